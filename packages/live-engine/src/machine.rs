//! Per-query protocol state machine
//!
//! Created -> AwaitingInitialRequest -> LiveQuery, falling back to
//! AwaitingInitialRequest whenever the live session is lost. Every fallback
//! resets the cache: the site's cursor is meaningless once the session is
//! gone, so the next bootstrap starts from a fresh snapshot.

use std::fmt;
use tracing::debug;

use crate::cache::ItemCache;
use crate::error::{EngineError, EngineResult};

/// Cursor value the site expects on the first delta request
pub const INITIAL_CURSOR: &str = "-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryState {
    Created,
    AwaitingInitialRequest,
    LiveQuery,
    Disposed,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryState::Created => "Created",
            QueryState::AwaitingInitialRequest => "AwaitingInitialRequest",
            QueryState::LiveQuery => "LiveQuery",
            QueryState::Disposed => "Disposed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Create,
    ReceivedUnexpectedInitialResponse,
    LiveQueryStarted(String),
    LiveQuerySucceeded(String),
    LiveQueryFailed,
    Dispose,
}

impl Trigger {
    fn name(&self) -> &'static str {
        match self {
            Trigger::Create => "Create",
            Trigger::ReceivedUnexpectedInitialResponse => "ReceivedUnexpectedInitialResponse",
            Trigger::LiveQueryStarted(_) => "LiveQueryStarted",
            Trigger::LiveQuerySucceeded(_) => "LiveQuerySucceeded",
            Trigger::LiveQueryFailed => "LiveQueryFailed",
            Trigger::Dispose => "Dispose",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Site-assigned live channel and our position in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub live_query_id: String,
    pub next_cursor: String,
}

#[derive(Debug)]
pub struct QueryStateMachine {
    state: QueryState,
    live: Option<LiveSession>,
    cache: ItemCache,
}

impl Default for QueryStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryStateMachine {
    pub fn new() -> Self {
        Self {
            state: QueryState::Created,
            live: None,
            cache: ItemCache::new(),
        }
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn live_session(&self) -> Option<&LiveSession> {
        self.live.as_ref()
    }

    pub fn cache(&self) -> &ItemCache {
        &self.cache
    }

    /// Cache mutation is only meaningful while a session could be alive
    pub fn cache_mut(&mut self) -> Option<&mut ItemCache> {
        match self.state {
            QueryState::Disposed => None,
            _ => Some(&mut self.cache),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state == QueryState::Disposed
    }

    /// Apply a trigger and run the entry action of the target state.
    ///
    /// Once disposed every trigger is ignored. Pairs outside the transition
    /// table leave the machine untouched and return `InvalidTransition`.
    pub fn fire(&mut self, trigger: Trigger) -> EngineResult<QueryState> {
        if self.state == QueryState::Disposed {
            debug!("Ignoring {} on disposed query", trigger);
            return Ok(QueryState::Disposed);
        }

        let next = Self::target(self.state, &trigger).ok_or_else(|| {
            EngineError::InvalidTransition {
                state: self.state.to_string(),
                trigger: trigger.to_string(),
            }
        })?;

        debug!("{} --{}--> {}", self.state, trigger, next);
        let previous = self.state;
        self.state = next;
        self.on_entry(previous, trigger);
        Ok(next)
    }

    fn target(state: QueryState, trigger: &Trigger) -> Option<QueryState> {
        use QueryState::*;

        match (state, trigger) {
            (_, Trigger::Dispose) => Some(Disposed),
            (Created, Trigger::Create) => Some(AwaitingInitialRequest),
            (AwaitingInitialRequest, Trigger::ReceivedUnexpectedInitialResponse) => {
                Some(AwaitingInitialRequest)
            }
            (AwaitingInitialRequest, Trigger::LiveQueryStarted(_)) => Some(LiveQuery),
            (LiveQuery, Trigger::LiveQuerySucceeded(_)) => Some(LiveQuery),
            (LiveQuery, Trigger::LiveQueryFailed) => Some(AwaitingInitialRequest),
            _ => None,
        }
    }

    fn on_entry(&mut self, previous: QueryState, trigger: Trigger) {
        match (self.state, trigger) {
            (QueryState::AwaitingInitialRequest, _) | (QueryState::Disposed, _) => {
                self.cache.clear();
                self.live = None;
            }
            (QueryState::LiveQuery, Trigger::LiveQueryStarted(live_query_id)) => {
                self.live = Some(LiveSession {
                    live_query_id,
                    next_cursor: INITIAL_CURSOR.to_string(),
                });
            }
            (QueryState::LiveQuery, Trigger::LiveQuerySucceeded(next_cursor)) => {
                if let Some(live) = self.live.as_mut() {
                    live.next_cursor = next_cursor;
                }
            }
            (state, trigger) => {
                debug!("No entry action for {} -> {} via {}", previous, state, trigger);
            }
        }
    }
}
