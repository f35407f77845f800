//! Query source registry
//!
//! Maps each distinct query to its single live source. The map lock is held
//! only for lookup-or-insert, which does no I/O; fetching happens outside it
//! under the source's own lock, so different queries progress in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::models::{Query, QueryResult};
use crate::parser::{ItemParser, JsonItemParser};
use crate::search::SearchClient;
use crate::source::RealtimeItemSource;
use crate::transport;

pub struct QuerySourceRegistry {
    config: EngineConfig,
    search: SearchClient,
    sources: Mutex<HashMap<Query, Arc<RealtimeItemSource>>>,
    sources_created: AtomicUsize,
}

impl QuerySourceRegistry {
    /// Registry talking to the configured site over reqwest, parsing JSON
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let http = Arc::new(ReqwestHttpClient::from_config(&config)?);
        Ok(Self::with_collaborators(config, http, Arc::new(JsonItemParser)))
    }

    /// Registry with injected HTTP client and parser
    pub fn with_collaborators(
        config: EngineConfig,
        http: Arc<dyn HttpClient>,
        parser: Arc<dyn ItemParser>,
    ) -> Self {
        let search = SearchClient::new(http, parser, config.site.clone());
        Self {
            config,
            search,
            sources: Mutex::new(HashMap::new()),
            sources_created: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current result for `query`, creating its source on first use.
    ///
    /// Only an invalid query is reported as an error; transport trouble
    /// shows up as an empty or stale snapshot.
    pub async fn issue_query(&self, query: &Query) -> EngineResult<QueryResult> {
        query.validate()?;
        let source = self.get_or_create(query).await;
        Ok(source.get_result().await)
    }

    async fn get_or_create(&self, query: &Query) -> Arc<RealtimeItemSource> {
        let mut sources = self.sources.lock().await;
        if let Some(source) = sources.get(query) {
            return source.clone();
        }

        let source = Arc::new(RealtimeItemSource::new(
            query.clone(),
            self.search.clone(),
            transport::from_config(&self.config),
        ));
        self.sources_created.fetch_add(1, Ordering::SeqCst);
        info!("[{}] Registered {:?} source for {}", source.id(), self.config.transport, query);
        sources.insert(query.clone(), source.clone());
        source
    }

    /// Drop the source for `query`; returns whether one existed
    pub async fn dispose_query(&self, query: &Query) -> bool {
        let removed = self.sources.lock().await.remove(query);
        match removed {
            Some(source) => {
                source.dispose().await;
                true
            }
            None => {
                debug!("No source registered for {}", query);
                false
            }
        }
    }

    /// Dispose every registered source
    pub async fn dispose_all(&self) {
        let drained: Vec<Arc<RealtimeItemSource>> = {
            let mut sources = self.sources.lock().await;
            sources.drain().map(|(_, source)| source).collect()
        };
        for source in drained {
            source.dispose().await;
        }
    }

    pub async fn contains(&self, query: &Query) -> bool {
        self.sources.lock().await.contains_key(query)
    }

    pub async fn len(&self) -> usize {
        self.sources.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.lock().await.is_empty()
    }

    pub async fn active_queries(&self) -> Vec<Query> {
        self.sources.lock().await.keys().cloned().collect()
    }

    /// Registered source for `query`, if any
    pub async fn source(&self, query: &Query) -> Option<Arc<RealtimeItemSource>> {
        self.sources.lock().await.get(query).cloned()
    }

    /// Total number of sources ever constructed by this registry
    pub fn sources_created(&self) -> usize {
        self.sources_created.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, EngineResult};
    use crate::http::PostRequest;
    use crate::machine::QueryState;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Slow site that counts searches and always answers the same way
    #[derive(Default)]
    struct CountingSite {
        searches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for CountingSite {
        async fn post_form(&self, request: PostRequest) -> EngineResult<String> {
            if request.url.contains("/search/") {
                self.searches.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(r#"{"live_url":"/live/S1","items":[{"hash":"a"}]}"#.to_string())
            } else {
                Ok(r#"{"newid":"2","data":""}"#.to_string())
            }
        }
    }

    fn registry(site: Arc<CountingSite>) -> Arc<QuerySourceRegistry> {
        Arc::new(QuerySourceRegistry::with_collaborators(
            EngineConfig::for_site("http://site", "ws://site"),
            site,
            Arc::new(JsonItemParser),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issue_creates_one_source() {
        let site = Arc::new(CountingSite::default());
        let registry = registry(site.clone());
        let query = Query::new("Standard").param("name", "Mageblood");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let query = query.clone();
            handles.push(tokio::spawn(async move {
                registry.issue_query(&query).await.unwrap()
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.state, QueryState::LiveQuery);
        }

        assert_eq!(registry.sources_created(), 1);
        assert_eq!(registry.len().await, 1);
        assert_eq!(site.searches.load(Ordering::SeqCst), 1);
        assert_eq!(site.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_queries_progress_in_parallel() {
        let site = Arc::new(CountingSite::default());
        let registry = registry(site.clone());

        let mut handles = Vec::new();
        for i in 0..4 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let query = Query::new("Standard").param("name", format!("item-{}", i));
                registry.issue_query(&query).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.sources_created(), 4);
        assert_eq!(site.searches.load(Ordering::SeqCst), 4);
        assert!(site.max_in_flight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_sources_are_reused() {
        let site = Arc::new(CountingSite::default());
        let registry = registry(site.clone());
        let query = Query::new("Standard").param("name", "Headhunter");

        let first = registry.issue_query(&query).await.unwrap();
        let second = registry.issue_query(&query).await.unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(second.state, QueryState::LiveQuery);
        assert_eq!(registry.sources_created(), 1);
        assert_eq!(site.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_query_fails_fast() {
        let site = Arc::new(CountingSite::default());
        let registry = registry(site.clone());

        let err = registry.issue_query(&Query::new("")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuery(_)));
        assert!(registry.is_empty().await);
        assert_eq!(registry.sources_created(), 0);
        assert_eq!(site.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispose_query_removes_and_disposes() {
        let site = Arc::new(CountingSite::default());
        let registry = registry(site.clone());
        let query = Query::new("Standard").param("name", "Aegis Aurora");

        registry.issue_query(&query).await.unwrap();
        let source = registry.source(&query).await.unwrap();

        assert!(registry.dispose_query(&query).await);
        assert!(source.is_disposed());
        assert_eq!(source.state().await, QueryState::Disposed);
        assert!(!registry.contains(&query).await);
        assert!(!registry.dispose_query(&query).await);

        // A later issue starts over with a fresh source
        registry.issue_query(&query).await.unwrap();
        assert_eq!(registry.sources_created(), 2);
        assert_eq!(site.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispose_all() {
        let site = Arc::new(CountingSite::default());
        let registry = registry(site);
        let a = Query::new("Standard").param("name", "a");
        let b = Query::new("Hardcore").param("name", "b");

        registry.issue_query(&a).await.unwrap();
        registry.issue_query(&b).await.unwrap();
        assert_eq!(registry.active_queries().await.len(), 2);

        registry.dispose_all().await;
        assert!(registry.is_empty().await);
    }
}
