use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a live query learns about new listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Delta POST on every `get_result`
    #[default]
    Polling,
    /// Push socket announcing new cursors, deltas fetched on notify
    WebSocket,
}

/// Trading site endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Search endpoint; the league is appended as a path segment
    pub search_url: String,
    /// Live delta endpoint; the live query id is appended
    pub live_url: String,
    /// Push socket endpoint; the live query id is appended
    pub socket_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self::for_root("http://localhost:8080", "ws://localhost:8080")
    }
}

impl SiteConfig {
    /// Endpoints laid out under a single site root
    pub fn for_root(http_root: &str, ws_root: &str) -> Self {
        let http_root = http_root.trim_end_matches('/');
        let ws_root = ws_root.trim_end_matches('/');
        Self {
            search_url: format!("{}/search", http_root),
            live_url: format!("{}/live", http_root),
            socket_url: format!("{}/ws", ws_root),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub site: SiteConfig,
    pub transport: TransportKind,
    pub request_timeout_ms: u64,
    pub ping_interval_secs: u64,
    pub close_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            transport: TransportKind::Polling,
            request_timeout_ms: 10_000,
            ping_interval_secs: 60,
            close_timeout_ms: 2_000,
            user_agent: format!("live-engine/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl EngineConfig {
    /// Default settings pointed at a site root
    pub fn for_site(http_root: &str, ws_root: &str) -> Self {
        Self {
            site: SiteConfig::for_root(http_root, ws_root),
            ..Self::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
