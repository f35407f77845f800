use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Timeout")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Search response did not contain a live session id")]
    MissingLiveSession,

    #[error("Live response did not contain a next cursor")]
    MissingCursor,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Trigger {trigger} is not permitted in state {state}")]
    InvalidTransition { state: String, trigger: String },

    #[error("Source is disposed")]
    Disposed,
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        EngineError::WebSocketError(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for EngineError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        EngineError::Timeout
    }
}
