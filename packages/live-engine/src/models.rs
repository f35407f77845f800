//! Engine data model: queries, listings and query results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::machine::QueryState;

/// Identity of a search against the trading site.
///
/// Two queries with the same league, parameters and session are the same
/// query; the registry keys live sources by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    league: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default)]
    session_id: Option<String>,
}

impl Query {
    pub fn new(league: impl Into<String>) -> Self {
        Self {
            league: league.into(),
            params: BTreeMap::new(),
            session_id: None,
        }
    }

    /// Add a search parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Attach the session credential sent as a cookie with every request
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn league(&self) -> &str {
        &self.league
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Form fields posted to the search endpoint
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![("league".to_string(), self.league.clone())];
        fields.extend(self.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        fields
    }

    /// Check the preconditions the registry enforces before building a source
    pub fn validate(&self) -> EngineResult<()> {
        if self.league.trim().is_empty() {
            return Err(EngineError::InvalidQuery("league must not be empty".to_string()));
        }
        if self.params.keys().any(|k| k.trim().is_empty()) {
            return Err(EngineError::InvalidQuery(
                "parameter names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.league)?;
        for (name, value) in &self.params {
            write!(f, " {}={}", name, value)?;
        }
        Ok(())
    }
}

/// Listing state as reported by the site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    #[default]
    Normal,
    Removed,
}

/// A single listing.
///
/// Only `hash` and `state` matter to the engine, the rest is carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub state: ItemState,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub seller: Option<String>,
    #[serde(default)]
    pub listed_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(hash: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            state: ItemState::Normal,
            name: name.into(),
            price: None,
            seller: None,
            listed_at: None,
        }
    }

    /// Same listing, marked as removed
    pub fn removed(mut self) -> Self {
        self.state = ItemState::Removed;
        self
    }

    pub fn is_removed(&self) -> bool {
        self.state == ItemState::Removed
    }

    /// Items without a hash cannot be deduplicated or subscribed to
    pub fn has_hash(&self) -> bool {
        !self.hash.trim().is_empty()
    }
}

/// Current result for a query, as handed to callers
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub query: Query,
    pub items: Vec<Item>,
    pub state: QueryState,
    pub fetched_at: DateTime<Utc>,
}

impl QueryResult {
    pub fn is_live(&self) -> bool {
        self.state == QueryState::LiveQuery
    }

    pub fn hashes(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.hash.as_str()).collect()
    }
}
