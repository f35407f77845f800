use live_engine::{EngineConfig, Query, TransportKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Watcher configuration (from apps/watcher/config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub site: SiteRootConfig,
    pub engine: WatcherEngineConfig,
    #[serde(default)]
    pub queries: Vec<QueryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRootConfig {
    pub http_root: String,
    pub ws_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherEngineConfig {
    #[serde(default)]
    pub transport: TransportKind,
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_ping_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub league: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub session_id: Option<String>,
}

impl QueryConfig {
    pub fn to_query(&self) -> Query {
        let query = self
            .params
            .iter()
            .fold(Query::new(self.league.clone()), |query, (name, value)| {
                query.param(name.clone(), value.clone())
            });
        match &self.session_id {
            Some(session) => query.session(session.clone()),
            None => query,
        }
    }
}

impl Config {
    /// Load watcher configuration from config.toml
    /// Uses CARGO_MANIFEST_DIR so the path is consistent regardless of where the binary is run from
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("WATCHER_CONFIG")
            .unwrap_or_else(|_| format!("{}/config.toml", env!("CARGO_MANIFEST_DIR")));

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(true));

        let settings = builder.build()?;
        settings.try_deserialize()
    }

    /// Engine settings for a site root; `http_root` may come from the environment
    pub fn engine_config(&self, http_root: &str) -> EngineConfig {
        let mut engine = EngineConfig::for_site(http_root, &self.site.ws_root)
            .with_transport(self.engine.transport);
        engine.request_timeout_ms = self.engine.request_timeout_ms;
        engine.ping_interval_secs = self.engine.ping_interval_secs;
        engine
    }

    pub fn queries(&self) -> Vec<Query> {
        self.queries.iter().map(QueryConfig::to_query).collect()
    }
}
