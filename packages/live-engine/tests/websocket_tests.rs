/// WebSocket transport against a live mock site
mod helpers;

use helpers::{eventually, query, sorted, TestFixture, LIVE_ID};
use live_engine::{Query, QueryState, TransportKind};
use live_engine_test_utils::{delta_body, item, removed, wait_for};
use std::time::Duration;

const WAIT_MS: u64 = 3_000;

/// Bootstrap `q` and wait until the socket subscribed to every listing
async fn go_live(fixture: &TestFixture, q: &Query, hashes: &[&str]) {
    fixture.script_search(LIVE_ID, hashes);
    let result = fixture.issue(q).await;
    assert_eq!(result.state, QueryState::LiveQuery);

    let expected = hashes.len();
    wait_for(|| fixture.site.subscribed_hashes().len() >= expected, WAIT_MS)
        .await
        .expect("socket should subscribe to the snapshot");
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_handshake_and_subscriptions() {
    let fixture = TestFixture::websocket()
        .await
        .expect("Failed to create test fixture");
    let q = query();
    go_live(&fixture, &q, &["a", "b", "c"]).await;

    assert_eq!(fixture.site.socket_paths(), vec![format!("/ws/{}", LIVE_ID)]);

    let messages = fixture.site.socket_messages();
    assert_eq!(messages[0], r#"{"type":"version","value":3}"#);
    assert_eq!(messages[1], r#"{"type":"ping"}"#);

    let mut subscribed = fixture.site.subscribed_hashes();
    subscribed.sort();
    assert_eq!(subscribed, vec!["a", "b", "c"]);

    // Polling is not used while the socket is up
    fixture.issue(&q).await;
    assert!(fixture.site.delta_requests().is_empty());
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_notify_fetches_delta_at_announced_cursor() {
    let fixture = TestFixture::websocket()
        .await
        .expect("Failed to create test fixture");
    let q = query();
    go_live(&fixture, &q, &["a", "b", "c"]).await;

    fixture
        .site
        .push_delta(delta_body("8", &[removed("a"), item("d")]));
    fixture.site.notify("7");

    let (fixture, q) = (&fixture, &q);
    let merged = eventually(
        move || async move { sorted(&fixture.issue(q).await) == vec!["b", "c", "d"] },
        WAIT_MS,
    )
    .await;
    assert!(merged, "delta should be merged after notify");
    assert_eq!(fixture.site.delta_cursors(), vec!["7"]);

    // New listings get their own subscription
    wait_for(
        || fixture.site.subscribed_hashes().contains(&"d".to_string()),
        WAIT_MS,
    )
    .await
    .expect("socket should subscribe to the new listing");
}

#[tokio::test]
async fn test_delete_removes_listing() {
    let fixture = TestFixture::websocket()
        .await
        .expect("Failed to create test fixture");
    let q = query();
    go_live(&fixture, &q, &["a", "b"]).await;

    fixture.site.delete("a");

    let (fixture, q) = (&fixture, &q);
    let removed = eventually(
        move || async move { sorted(&fixture.issue(q).await) == vec!["b"] },
        WAIT_MS,
    )
    .await;
    assert!(removed, "deleted listing should leave the snapshot");
    assert!(fixture.site.delta_requests().is_empty());
}

#[tokio::test]
async fn test_unknown_messages_are_ignored() {
    let fixture = TestFixture::websocket()
        .await
        .expect("Failed to create test fixture");
    let q = query();
    go_live(&fixture, &q, &["a"]).await;

    fixture.site.send_frame(r#"{"type":"motd","value":"hello"}"#);
    fixture.site.send_frame("not json");
    fixture.site.send_frame(r#"{"type":"pong"}"#);
    fixture.site.delete("a");

    let (fixture, q) = (&fixture, &q);
    let removed = eventually(
        move || async move { fixture.issue(q).await.items.is_empty() },
        WAIT_MS,
    )
    .await;
    assert!(removed, "socket should survive unknown frames");
    assert_eq!(fixture.state_of(q).await, Some(QueryState::LiveQuery));
}

// ============================================================================
// Failures and shutdown
// ============================================================================

#[tokio::test]
async fn test_site_close_resets_and_rebootstraps() {
    let fixture = TestFixture::websocket()
        .await
        .expect("Failed to create test fixture");
    let q = query();
    go_live(&fixture, &q, &["a", "b"]).await;

    fixture.site.close_sockets();

    let (fixture, q) = (&fixture, &q);
    let reset = eventually(
        move || async move {
            fixture.state_of(q).await == Some(QueryState::AwaitingInitialRequest)
        },
        WAIT_MS,
    )
    .await;
    assert!(reset, "closed socket should fail the live session");

    fixture.script_search("S2", &["x"]);
    let result = fixture.issue(q).await;
    assert_eq!(result.state, QueryState::LiveQuery);
    assert_eq!(sorted(&result), vec!["x"]);

    wait_for(|| fixture.site.socket_paths().len() == 2, WAIT_MS)
        .await
        .expect("a new socket should open for the new session");
    assert_eq!(fixture.site.socket_paths()[1], "/ws/S2");
}

#[tokio::test]
async fn test_notify_with_failing_delta_resets() {
    let fixture = TestFixture::websocket()
        .await
        .expect("Failed to create test fixture");
    let q = query();
    go_live(&fixture, &q, &["a"]).await;

    fixture.site.push_delta(r#"{"data":""}"#);
    fixture.site.notify("3");

    let (fixture, q) = (&fixture, &q);
    let reset = eventually(
        move || async move {
            fixture.state_of(q).await == Some(QueryState::AwaitingInitialRequest)
        },
        WAIT_MS,
    )
    .await;
    assert!(reset, "missing cursor should fail the live session");
}

#[tokio::test]
async fn test_dispose_stops_the_socket() {
    let fixture = TestFixture::websocket()
        .await
        .expect("Failed to create test fixture");
    let q = query();
    go_live(&fixture, &q, &["a"]).await;

    assert!(fixture.registry.dispose_query(&q).await);
    assert!(!fixture.registry.contains(&q).await);

    // The socket says goodbye before the task ends
    wait_for(|| fixture.site.client_closes() == 1, WAIT_MS)
        .await
        .expect("dispose should send a close frame");

    fixture.site.notify("5");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fixture.site.delta_requests().is_empty());
}

#[tokio::test]
async fn test_keepalive_pings() {
    let fixture = TestFixture::with_config(TransportKind::WebSocket, |config| {
        config.ping_interval_secs = 1;
    })
    .await
    .expect("Failed to create test fixture");
    let q = query();
    go_live(&fixture, &q, &["a"]).await;

    // Handshake ping plus at least two timer pings
    wait_for(|| fixture.site.ping_count() >= 3, 4_000)
        .await
        .expect("socket should keep pinging");
    assert_eq!(fixture.state_of(&q).await, Some(QueryState::LiveQuery));
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn test_relisted_item_is_subscribed_again() {
    let fixture = TestFixture::websocket()
        .await
        .expect("Failed to create test fixture");
    let q = query();
    go_live(&fixture, &q, &["a", "b"]).await;

    fixture.site.push_delta(delta_body("2", &[removed("a")]));
    fixture.site.notify("1");

    let (fixture, q) = (&fixture, &q);
    let gone = eventually(
        move || async move { sorted(&fixture.issue(q).await) == vec!["b"] },
        WAIT_MS,
    )
    .await;
    assert!(gone, "removed listing should leave the snapshot");

    fixture.site.push_delta(delta_body("3", &[item("a")]));
    fixture.site.notify("2");

    let count_a = || {
        fixture
            .site
            .subscribed_hashes()
            .iter()
            .filter(|hash| hash.as_str() == "a")
            .count()
    };
    wait_for(|| count_a() == 2, WAIT_MS)
        .await
        .expect("relisted item should be subscribed again");
    assert_eq!(sorted(&fixture.issue(q).await), vec!["a", "b"]);
    assert_eq!(fixture.site.delta_cursors(), vec!["1", "2"]);
}
