//! Response builders and polling helpers for tests

use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// An active listing
pub fn item(hash: &str) -> Value {
    json!({
        "hash": hash,
        "state": "normal",
        "name": format!("Listing {}", hash),
        "price": "1 chaos",
        "seller": "tester",
    })
}

/// A listing reported as removed
pub fn removed(hash: &str) -> Value {
    json!({ "hash": hash, "state": "removed" })
}

/// Search response announcing `live_url`
pub fn search_body(live_url: &str, items: &[Value]) -> String {
    json!({ "live_url": live_url, "items": items }).to_string()
}

/// Live delta response; `data` is carried as an embedded document like the site does
pub fn delta_body(newid: &str, items: &[Value]) -> String {
    let data = if items.is_empty() {
        String::new()
    } else {
        Value::Array(items.to_vec()).to_string()
    };
    json!({ "newid": newid, "data": data }).to_string()
}

/// Helper to wait for a condition with timeout
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("Timeout waiting for condition")
}
