use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{apply_delta, LiveTransport};
use crate::error::EngineError;
use crate::machine::{LiveSession, QueryStateMachine, Trigger};
use crate::source::SourceCore;

/// Pull-driven strategy: one delta POST per `get_result`
#[derive(Debug, Default)]
pub struct PollingTransport;

impl PollingTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LiveTransport for PollingTransport {
    async fn on_live_started(&self, core: &Arc<SourceCore>, session: &LiveSession, _epoch: u64) {
        debug!(
            "[{}] Polling live session {} from cursor {}",
            core.id, session.live_query_id, session.next_cursor
        );
    }

    async fn refresh(&self, core: &SourceCore, machine: &mut QueryStateMachine) {
        let Some(cursor) = machine.live_session().map(|live| live.next_cursor.clone()) else {
            return;
        };

        match apply_delta(core, machine, &cursor).await {
            Ok(stats) => {
                debug!(
                    "[{}] Delta after cursor {}: +{} -{}",
                    core.id, cursor, stats.upserted, stats.removed
                );
            }
            Err(EngineError::Disposed) => {
                debug!("[{}] Delta after cursor {} landed after dispose", core.id, cursor);
            }
            Err(e) => {
                warn!("[{}] Live query for {} failed: {}", core.id, core.query, e);
                core.counters.record_failure();
                core.fire(machine, Trigger::LiveQueryFailed);
            }
        }
    }

    async fn shutdown(&self) {}
}
