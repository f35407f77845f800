//! Parser capability: turns site response bodies into listings

use serde::Deserialize;

use crate::error::EngineResult;
use crate::models::Item;

/// Parsed search response
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<Item>,
    /// Where the site says the live feed for this search lives
    pub live_url: Option<String>,
}

pub trait ItemParser: Send + Sync {
    /// Parse the body returned by the search endpoint
    fn parse_search(&self, body: &str) -> EngineResult<SearchPage>;

    /// Parse the `data` payload of a live delta
    fn parse_items(&self, data: &str) -> EngineResult<Vec<Item>>;
}

/// Parser for the JSON rendition of the site:
/// `{"live_url": "...", "items": [...]}` for searches, a bare item array for deltas.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonItemParser;

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    live_url: Option<String>,
    #[serde(default)]
    items: Vec<Item>,
}

impl ItemParser for JsonItemParser {
    fn parse_search(&self, body: &str) -> EngineResult<SearchPage> {
        let body: SearchBody = serde_json::from_str(body)?;
        Ok(SearchPage {
            items: body.items,
            live_url: body.live_url,
        })
    }

    fn parse_items(&self, data: &str) -> EngineResult<Vec<Item>> {
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_parse_search() {
        let page = JsonItemParser
            .parse_search(
                r#"{"live_url":"/live/S1","items":[{"hash":"a","name":"Belly of the Beast"}]}"#,
            )
            .unwrap();
        assert_eq!(page.live_url.as_deref(), Some("/live/S1"));
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_parse_search_without_live_url() {
        let page = JsonItemParser.parse_search(r#"{"items":[]}"#).unwrap();
        assert!(page.live_url.is_none());
    }

    #[test]
    fn test_parse_items_blank_is_empty() {
        assert!(JsonItemParser.parse_items("").unwrap().is_empty());
        assert!(JsonItemParser.parse_items("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        let err = JsonItemParser.parse_search("<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, EngineError::SerializationError(_)));
    }
}
