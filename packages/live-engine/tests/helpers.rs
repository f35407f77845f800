#![allow(dead_code)]

/// Test helpers for engine integration tests
///
/// Every fixture talks to its own in-process mock site over real HTTP and
/// socket connections.
use live_engine::{
    EngineConfig, Query, QueryResult, QuerySourceRegistry, QueryState, TransportKind,
};
use live_engine_test_utils::{item, search_body, MockTradeSite};
use std::future::Future;
use std::time::{Duration, Instant};

pub const LEAGUE: &str = "Standard";
pub const LIVE_ID: &str = "S1";

/// A mock site with a registry pointed at it
pub struct TestFixture {
    pub site: MockTradeSite,
    pub registry: QuerySourceRegistry,
}

impl TestFixture {
    pub async fn polling() -> anyhow::Result<Self> {
        Self::with_transport(TransportKind::Polling).await
    }

    pub async fn websocket() -> anyhow::Result<Self> {
        Self::with_transport(TransportKind::WebSocket).await
    }

    pub async fn with_transport(transport: TransportKind) -> anyhow::Result<Self> {
        Self::with_config(transport, |_| {}).await
    }

    /// Fixture whose engine config is adjusted before the registry is built
    pub async fn with_config<F>(transport: TransportKind, adjust: F) -> anyhow::Result<Self>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let site = MockTradeSite::start().await?;
        let mut config = site.engine_config(transport);
        adjust(&mut config);
        let registry = QuerySourceRegistry::new(config)?;
        Ok(Self { site, registry })
    }

    /// Live url the way the site announces it
    pub fn live_url(&self, live_id: &str) -> String {
        self.site.url(&format!("/live/{}", live_id))
    }

    /// Script a search answering with `hashes` under live session `live_id`
    pub fn script_search(&self, live_id: &str, hashes: &[&str]) {
        let items: Vec<_> = hashes.iter().map(|h| item(h)).collect();
        self.site.push_search(search_body(&self.live_url(live_id), &items));
    }

    pub async fn issue(&self, query: &Query) -> QueryResult {
        self.registry
            .issue_query(query)
            .await
            .expect("query should be valid")
    }

    pub async fn state_of(&self, query: &Query) -> Option<QueryState> {
        match self.registry.source(query).await {
            Some(source) => Some(source.state().await),
            None => None,
        }
    }
}

pub fn query() -> Query {
    Query::new(LEAGUE).param("name", "Tabula Rasa")
}

pub fn sorted(result: &QueryResult) -> Vec<String> {
    let mut hashes: Vec<String> = result.hashes().into_iter().map(str::to_string).collect();
    hashes.sort();
    hashes
}

/// Poll an async condition until it holds or `timeout_ms` runs out
pub async fn eventually<F, Fut>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
