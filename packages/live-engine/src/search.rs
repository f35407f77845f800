//! Snapshot and delta protocol shared by both live transports

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::config::SiteConfig;
use crate::error::{EngineError, EngineResult};
use crate::http::{HttpClient, PostRequest};
use crate::models::{Item, Query};
use crate::parser::ItemParser;

const SESSION_COOKIE: &str = "session_id";
const LEAGUE_COOKIE: &str = "league";
/// The live endpoints only answer requests marked as XHR
const REQUESTED_WITH_HEADER: &str = "X-Requested-With";
const REQUESTED_WITH: &str = "XMLHttpRequest";

/// Result of the initial search
#[derive(Debug, Clone)]
pub struct InitialSnapshot {
    pub items: Vec<Item>,
    pub live_query_id: String,
}

/// Result of one delta fetch
#[derive(Debug, Clone)]
pub struct Delta {
    pub items: Vec<Item>,
    pub next_cursor: String,
}

#[derive(Deserialize)]
struct DeltaBody {
    #[serde(default)]
    newid: Value,
    #[serde(default)]
    data: Value,
}

#[derive(Clone)]
pub struct SearchClient {
    http: Arc<dyn HttpClient>,
    parser: Arc<dyn ItemParser>,
    site: SiteConfig,
}

impl SearchClient {
    pub fn new(http: Arc<dyn HttpClient>, parser: Arc<dyn ItemParser>, site: SiteConfig) -> Self {
        Self { http, parser, site }
    }

    /// Run the search and pick the live session id out of the response
    pub async fn fetch_initial(&self, query: &Query) -> EngineResult<InitialSnapshot> {
        let url = format!(
            "{}/{}",
            self.site.search_url.trim_end_matches('/'),
            query.league()
        );
        let mut request = Self::prepare(PostRequest::new(url), query);
        request.form = query.form_fields();

        let body = self.http.post_form(request).await?;
        let page = self.parser.parse_search(&body)?;

        let live_query_id = page
            .live_url
            .as_deref()
            .and_then(extract_live_query_id)
            .ok_or(EngineError::MissingLiveSession)?;

        let items = keep_hashed(page.items);
        debug!(
            "Search for {} returned {} items, live session {}",
            query,
            items.len(),
            live_query_id
        );
        Ok(InitialSnapshot {
            items,
            live_query_id,
        })
    }

    /// Fetch whatever changed after `cursor`.
    ///
    /// A response without `newid` is a protocol violation: re-posting the
    /// same cursor would loop on the same request forever.
    pub async fn fetch_delta(
        &self,
        query: &Query,
        live_query_id: &str,
        cursor: &str,
    ) -> EngineResult<Delta> {
        let url = format!(
            "{}/{}",
            self.site.live_url.trim_end_matches('/'),
            live_query_id
        );
        let request =
            Self::prepare(PostRequest::new(url), query).form_field("id", cursor);

        let body = self.http.post_form(request).await?;
        let body: DeltaBody = serde_json::from_str(&body)?;

        let next_cursor = value_as_text(&body.newid)
            .filter(|cursor| !cursor.trim().is_empty())
            .ok_or(EngineError::MissingCursor)?;

        let items = match value_as_text(&body.data) {
            Some(data) => keep_hashed(self.parser.parse_items(&data)?),
            None => Vec::new(),
        };

        Ok(Delta { items, next_cursor })
    }

    fn prepare(request: PostRequest, query: &Query) -> PostRequest {
        let request = request
            .header(REQUESTED_WITH_HEADER, REQUESTED_WITH)
            .cookie(LEAGUE_COOKIE, query.league());
        match query.session_id() {
            Some(session) => request.cookie(SESSION_COOKIE, session),
            None => request,
        }
    }
}

/// Last non-empty path segment of a live url; a bare id is returned as is
pub fn extract_live_query_id(live_url: &str) -> Option<String> {
    let url = live_url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    // The authority of an absolute url is never the id
    let path = match url.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path)?,
        None => url,
    };
    path.rsplit('/')
        .find(|segment| !segment.trim().is_empty())
        .map(|segment| segment.trim().to_string())
        .filter(|segment| !segment.contains(':'))
}

pub(crate) fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn keep_hashed(items: Vec<Item>) -> Vec<Item> {
    items.into_iter().filter(Item::has_hash).collect()
}
