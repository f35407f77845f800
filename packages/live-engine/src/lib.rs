//! Live Engine
//!
//! Realtime market-query engine for a third-party trading site.
//!
//! This crate provides:
//! - A per-query state machine (snapshot, live subscription, recovery)
//! - A deduplicating item cache keyed by listing hash
//! - Two live transports: HTTP polling and WebSocket push
//! - A registry keeping at most one live source per distinct query
//!
//! # Example
//!
//! ```no_run
//! use live_engine::{EngineConfig, Query, QuerySourceRegistry, TransportKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::for_site("http://localhost:8080", "ws://localhost:8080")
//!         .with_transport(TransportKind::WebSocket);
//!     let registry = QuerySourceRegistry::new(config)?;
//!
//!     let query = Query::new("Standard").param("name", "Tabula Rasa");
//!
//!     // First call bootstraps, later calls return the live snapshot
//!     let result = registry.issue_query(&query).await?;
//!     for item in &result.items {
//!         println!("{} {}", item.hash, item.name);
//!     }
//!
//!     registry.dispose_query(&query).await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod machine;
pub mod models;
pub mod parser;
pub mod registry;
pub mod search;
pub mod source;
pub mod transport;

pub use cache::{ItemCache, MergeStats};
pub use config::{EngineConfig, SiteConfig, TransportKind};
pub use error::{EngineError, EngineResult};
pub use http::{HttpClient, PostRequest, ReqwestHttpClient};
pub use machine::{LiveSession, QueryState, QueryStateMachine, Trigger, INITIAL_CURSOR};
pub use models::{Item, ItemState, Query, QueryResult};
pub use parser::{ItemParser, JsonItemParser, SearchPage};
pub use registry::QuerySourceRegistry;
pub use search::{Delta, InitialSnapshot, SearchClient};
pub use source::{RealtimeItemSource, SourceStats};
pub use transport::{LiveTransport, PollingTransport, WebSocketTransport};
