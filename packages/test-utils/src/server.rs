use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header::COOKIE, HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Form, Router,
};
use futures_util::{SinkExt, StreamExt};
use live_engine::{EngineConfig, TransportKind};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// A request the site received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub form: Vec<(String, String)>,
    pub cookie: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
enum Frame {
    Text(String),
    Close,
}

type Reply = (StatusCode, String);

#[derive(Default)]
struct SiteState {
    searches: Mutex<VecDeque<Reply>>,
    deltas: Mutex<VecDeque<Reply>>,
    search_requests: Mutex<Vec<RecordedRequest>>,
    delta_requests: Mutex<Vec<RecordedRequest>>,
    socket_paths: Mutex<Vec<String>>,
    socket_messages: Mutex<Vec<String>>,
    client_closes: Mutex<usize>,
    frames: Mutex<Option<broadcast::Sender<Frame>>>,
}

impl SiteState {
    fn frames(&self) -> broadcast::Sender<Frame> {
        self.frames
            .lock()
            .unwrap()
            .get_or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

/// Handle to a running mock trading site
///
/// Unscripted searches answer 503, unscripted deltas echo the posted cursor
/// back as `newid` with no data.
pub struct MockTradeSite {
    pub base_url: String,
    pub ws_url: String,
    state: Arc<SiteState>,
    _shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl MockTradeSite {
    /// Start the site on a random available port; it shuts down when dropped
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(SiteState::default());

        let app = Router::new()
            .route("/search/{league}", post(search_handler))
            .route("/live/{id}", post(live_handler))
            .route("/ws/{id}", get(ws_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind mock site: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let base_url = format!("http://{}", addr);
        let ws_url = format!("ws://{}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
            {
                tracing::error!("Mock site stopped: {}", e);
            }
        });

        Ok(Self {
            base_url,
            ws_url,
            state,
            _shutdown_tx: shutdown_tx,
        })
    }

    /// Engine config pointed at this site, with short timeouts for tests
    pub fn engine_config(&self, transport: TransportKind) -> EngineConfig {
        let mut config =
            EngineConfig::for_site(&self.base_url, &self.ws_url).with_transport(transport);
        config.request_timeout_ms = 2_000;
        config.close_timeout_ms = 500;
        config
    }

    /// Build full HTTP URL for a path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ===== Scripting =====

    pub fn push_search(&self, body: impl Into<String>) {
        self.push_search_reply(200, body);
    }

    pub fn push_search_reply(&self, status: u16, body: impl Into<String>) {
        self.state
            .searches
            .lock()
            .unwrap()
            .push_back((status_code(status), body.into()));
    }

    pub fn push_delta(&self, body: impl Into<String>) {
        self.push_delta_reply(200, body);
    }

    pub fn push_delta_reply(&self, status: u16, body: impl Into<String>) {
        self.state
            .deltas
            .lock()
            .unwrap()
            .push_back((status_code(status), body.into()));
    }

    /// Announce a new cursor on every open socket
    pub fn notify(&self, cursor: &str) {
        self.send_frame(serde_json::json!({"type": "notify", "value": cursor}).to_string());
    }

    /// Announce a removed listing on every open socket
    pub fn delete(&self, hash: &str) {
        self.send_frame(serde_json::json!({"type": "del", "value": hash}).to_string());
    }

    pub fn send_frame(&self, text: impl Into<String>) {
        let _ = self.state.frames().send(Frame::Text(text.into()));
    }

    /// Close every open socket from the site's side
    pub fn close_sockets(&self) {
        let _ = self.state.frames().send(Frame::Close);
    }

    // ===== Recorded traffic =====

    pub fn search_requests(&self) -> Vec<RecordedRequest> {
        self.state.search_requests.lock().unwrap().clone()
    }

    pub fn search_count(&self) -> usize {
        self.state.search_requests.lock().unwrap().len()
    }

    pub fn delta_requests(&self) -> Vec<RecordedRequest> {
        self.state.delta_requests.lock().unwrap().clone()
    }

    /// Cursors posted to the live endpoint, in order
    pub fn delta_cursors(&self) -> Vec<String> {
        self.delta_requests()
            .iter()
            .filter_map(|r| r.field("id").map(str::to_string))
            .collect()
    }

    /// Paths of every socket ever opened, in order
    pub fn socket_paths(&self) -> Vec<String> {
        self.state.socket_paths.lock().unwrap().clone()
    }

    /// Text frames received from clients, in order
    pub fn socket_messages(&self) -> Vec<String> {
        self.state.socket_messages.lock().unwrap().clone()
    }

    /// Close frames sent by clients
    pub fn client_closes(&self) -> usize {
        *self.state.client_closes.lock().unwrap()
    }

    /// Pings received from clients, handshake ping included
    pub fn ping_count(&self) -> usize {
        self.socket_messages()
            .iter()
            .filter_map(|text| serde_json::from_str::<serde_json::Value>(text).ok())
            .filter(|msg| msg["type"] == "ping")
            .count()
    }

    /// Hashes the clients subscribed to
    pub fn subscribed_hashes(&self) -> Vec<String> {
        self.socket_messages()
            .iter()
            .filter_map(|text| serde_json::from_str::<serde_json::Value>(text).ok())
            .filter(|msg| msg["type"] == "subscribe")
            .filter_map(|msg| msg["value"].as_str().map(str::to_string))
            .collect()
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn record(path: String, form: Vec<(String, String)>, headers: &HeaderMap) -> RecordedRequest {
    RecordedRequest {
        path,
        form,
        cookie: headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
    }
}

async fn search_handler(
    State(state): State<Arc<SiteState>>,
    Path(league): Path<String>,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> Reply {
    state
        .search_requests
        .lock()
        .unwrap()
        .push(record(format!("/search/{}", league), form, &headers));

    state.searches.lock().unwrap().pop_front().unwrap_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "no search scripted".to_string(),
    ))
}

async fn live_handler(
    State(state): State<Arc<SiteState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> Reply {
    let request = record(format!("/live/{}", id), form, &headers);
    let cursor = request.field("id").unwrap_or_default().to_string();
    state.delta_requests.lock().unwrap().push(request);

    state.deltas.lock().unwrap().pop_front().unwrap_or_else(|| {
        (
            StatusCode::OK,
            serde_json::json!({"newid": cursor, "data": ""}).to_string(),
        )
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<Arc<SiteState>>,
) -> Response {
    state.socket_paths.lock().unwrap().push(format!("/ws/{}", id));
    let frames = state.frames().subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, state, frames))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<SiteState>,
    mut frames: broadcast::Receiver<Frame>,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.socket_messages.lock().unwrap().push(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) => {
                    *state.client_closes.lock().unwrap() += 1;
                    break;
                }
                None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },

            frame = frames.recv() => match frame {
                Ok(Frame::Text(text)) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Frame::Close) => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
