//! HTTP capability used by the search protocol

use async_trait::async_trait;
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::Client;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// A form POST with the cookies and headers the site expects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostRequest {
    pub url: String,
    pub form: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl PostRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of the `Cookie` header, if any cookies are set
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// POST a form and return the response body
    async fn post_form(&self, request: PostRequest) -> EngineResult<String>;
}

/// reqwest-backed client with a per-request timeout
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: Client,
    user_agent: String,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration, user_agent: impl Into<String>) -> EngineResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }

    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        Self::new(config.request_timeout(), config.user_agent.clone())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_form(&self, request: PostRequest) -> EngineResult<String> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(USER_AGENT, &self.user_agent)
            .form(&request.form);

        if let Some(cookies) = request.cookie_header() {
            builder = builder.header(COOKIE, cookies);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        if response.status().is_success() {
            response.text().await.map_err(map_reqwest_error)
        } else {
            Err(EngineError::ApiError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout
    } else {
        EngineError::HttpError(e)
    }
}
