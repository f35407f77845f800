//! Live transport strategies
//!
//! Both strategies share the delta fetch from [`crate::search`]; they differ
//! only in what triggers it: `get_result` for polling, push notifications
//! for the socket.

pub mod polling;
pub mod websocket;

use async_trait::async_trait;
use std::sync::Arc;

use crate::cache::MergeStats;
use crate::config::{EngineConfig, TransportKind};
use crate::error::{EngineError, EngineResult};
use crate::machine::{LiveSession, QueryStateMachine, Trigger};
use crate::source::SourceCore;

pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Called right after the machine entered `LiveQuery`, with the source lock held
    async fn on_live_started(&self, core: &Arc<SourceCore>, session: &LiveSession, epoch: u64);

    /// Called from `get_result` while already live, with the source lock held
    async fn refresh(&self, core: &SourceCore, machine: &mut QueryStateMachine);

    /// Release connections; never fails
    async fn shutdown(&self);
}

/// Build the strategy selected in the config
pub fn from_config(config: &EngineConfig) -> Box<dyn LiveTransport> {
    match config.transport {
        TransportKind::Polling => Box::new(PollingTransport::new()),
        TransportKind::WebSocket => Box::new(WebSocketTransport::from_config(config)),
    }
}

/// Fetch the delta after `cursor`, merge it and advance the cursor.
///
/// On error nothing is merged; the caller decides how the session fails.
pub(crate) async fn apply_delta(
    core: &SourceCore,
    machine: &mut QueryStateMachine,
    cursor: &str,
) -> EngineResult<MergeStats> {
    let live_query_id = machine
        .live_session()
        .map(|live| live.live_query_id.clone())
        .ok_or(EngineError::Disposed)?;

    let delta = core
        .search
        .fetch_delta(&core.query, &live_query_id, cursor)
        .await?;

    if core.is_disposed() {
        return Err(EngineError::Disposed);
    }
    let stats = machine
        .cache_mut()
        .map(|cache| cache.apply(delta.items))
        .ok_or(EngineError::Disposed)?;
    core.fire(machine, Trigger::LiveQuerySucceeded(delta.next_cursor));
    core.counters.record_delta();
    Ok(stats)
}
