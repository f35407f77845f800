//! Realtime item source: one query, one state machine, one transport
//!
//! `get_result` drives the machine forward as a side effect and always hands
//! back the current snapshot. Every trigger and cache write goes through the
//! per-source `machine` lock, including the socket task's handlers.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::machine::{QueryState, QueryStateMachine, Trigger};
use crate::models::{Query, QueryResult};
use crate::search::SearchClient;
use crate::transport::LiveTransport;

/// Per-source counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub bootstrap_attempts: u64,
    pub bootstraps: u64,
    pub deltas_applied: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SourceCounters {
    bootstrap_attempts: AtomicU64,
    bootstraps: AtomicU64,
    deltas_applied: AtomicU64,
    failures: AtomicU64,
}

impl SourceCounters {
    pub(crate) fn record_bootstrap_attempt(&self) {
        self.bootstrap_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bootstrap(&self) {
        self.bootstraps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delta(&self) {
        self.deltas_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SourceStats {
        SourceStats {
            bootstrap_attempts: self.bootstrap_attempts.load(Ordering::Relaxed),
            bootstraps: self.bootstraps.load(Ordering::Relaxed),
            deltas_applied: self.deltas_applied.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the source and its background tasks
pub struct SourceCore {
    pub(crate) id: Uuid,
    pub(crate) query: Query,
    pub(crate) search: SearchClient,
    pub(crate) transport: Box<dyn LiveTransport>,
    pub(crate) machine: Mutex<QueryStateMachine>,
    pub(crate) counters: SourceCounters,
    disposed: AtomicBool,
    /// Bumped on every `LiveQueryStarted`; background tasks compare it to
    /// tell whether the session they were started for is still current.
    live_epoch: AtomicU64,
}

impl SourceCore {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn live_epoch(&self) -> u64 {
        self.live_epoch.load(Ordering::SeqCst)
    }

    /// Fire a trigger; rejected transitions are logged, never propagated
    pub(crate) fn fire(&self, machine: &mut QueryStateMachine, trigger: Trigger) {
        if let Err(e) = machine.fire(trigger) {
            warn!("[{}] {}", self.id, e);
        }
    }
}

pub struct RealtimeItemSource {
    core: Arc<SourceCore>,
}

impl RealtimeItemSource {
    /// Build a source; nothing touches the network until the first `get_result`
    pub fn new(query: Query, search: SearchClient, transport: Box<dyn LiveTransport>) -> Self {
        let core = SourceCore {
            id: Uuid::new_v4(),
            query,
            search,
            transport,
            machine: Mutex::new(QueryStateMachine::new()),
            counters: SourceCounters::default(),
            disposed: AtomicBool::new(false),
            live_epoch: AtomicU64::new(0),
        };
        debug!("[{}] Created source for {}", core.id, core.query);
        Self {
            core: Arc::new(core),
        }
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn query(&self) -> &Query {
        &self.core.query
    }

    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    pub async fn state(&self) -> QueryState {
        self.core.machine.lock().await.state()
    }

    pub fn stats(&self) -> SourceStats {
        self.core.counters.snapshot()
    }

    /// Current result for the query.
    ///
    /// Bootstraps when no session is live, otherwise lets the transport
    /// refresh. Failures only show up as a snapshot that stops growing.
    pub async fn get_result(&self) -> QueryResult {
        let core = &self.core;
        let mut machine = core.machine.lock().await;

        if !core.is_disposed() {
            if machine.state() == QueryState::Created {
                core.fire(&mut machine, Trigger::Create);
            }

            match machine.state() {
                QueryState::AwaitingInitialRequest => self.bootstrap(&mut machine).await,
                QueryState::LiveQuery => core.transport.refresh(core, &mut machine).await,
                QueryState::Created | QueryState::Disposed => {}
            }
        }

        QueryResult {
            query: core.query.clone(),
            items: machine.cache().snapshot(),
            state: machine.state(),
            fetched_at: Utc::now(),
        }
    }

    async fn bootstrap(&self, machine: &mut QueryStateMachine) {
        let core = &self.core;
        core.counters.record_bootstrap_attempt();

        let snapshot = match core.search.fetch_initial(&core.query).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("[{}] Initial search for {} failed: {}", core.id, core.query, e);
                core.counters.record_failure();
                core.fire(machine, Trigger::ReceivedUnexpectedInitialResponse);
                return;
            }
        };

        if core.is_disposed() {
            return;
        }

        core.fire(machine, Trigger::LiveQueryStarted(snapshot.live_query_id));
        let epoch = core.live_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(cache) = machine.cache_mut() {
            cache.apply(snapshot.items);
        }
        core.counters.record_bootstrap();

        let Some(session) = machine.live_session().cloned() else {
            return;
        };
        info!(
            "[{}] Live query {} started for {} with {} items",
            core.id,
            session.live_query_id,
            core.query,
            machine.cache().len()
        );
        core.transport.on_live_started(core, &session, epoch).await;
    }

    /// Tear the source down. Safe to call any number of times, from any state.
    pub async fn dispose(&self) {
        let core = &self.core;
        if core.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut machine = core.machine.lock().await;
            core.fire(&mut machine, Trigger::Dispose);
        }
        core.transport.shutdown().await;
        info!("[{}] Disposed source for {}", core.id, core.query);
    }
}
