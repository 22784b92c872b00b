// Integration tests for `RtdbClient` and the listener, using wiremock.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lumen_api::{Error, ListenerHandle, ReconnectConfig, RtdbClient, StoreEvent, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, RtdbClient) {
    let server = MockServer::start().await;
    let client = RtdbClient::new(
        server.uri().parse().expect("mock server uri"),
        &TransportConfig::default(),
    )
    .expect("client construction");
    (server, client)
}

// ── REST operations ─────────────────────────────────────────────────

#[tokio::test]
async fn test_get_node() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/lights.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"living_room": true, "bedroom": false})),
        )
        .mount(&server)
        .await;

    let value = client.get("lights").await.expect("get").expect("value");
    assert_eq!(value, json!({"living_room": true, "bedroom": false}));
}

#[tokio::test]
async fn test_get_absent_node_is_none() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/lights.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    assert!(client.get("lights").await.expect("get").is_none());
}

#[tokio::test]
async fn test_put_writes_single_boolean() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/lights/bedroom.json"))
        .and(body_json(json!(true)))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    client.put("lights/bedroom", &true).await.expect("put");
}

#[tokio::test]
async fn test_error_envelope_is_unwrapped() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/lights/bedroom.json"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "Permission denied"})),
        )
        .mount(&server)
        .await;

    let err = client.put("lights/bedroom", &true).await.expect_err("put");
    assert!(err.is_permission_denied());
    match err {
        Error::Database { message, status } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Permission denied");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ── Listener ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_listener_delivers_folded_snapshot() {
    let (server, client) = setup().await;

    let sse = "event: put\ndata: {\"path\":\"/\",\"data\":{\"bedroom\":true,\"kitchen\":false}}\n\n";
    Mock::given(method("GET"))
        .and(path("/lights.json"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let handle = ListenerHandle::spawn(client, "lights", ReconnectConfig::default(), cancel);
    let mut rx = handle.subscribe();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timely delivery")
        .expect("open channel");
    match event {
        StoreEvent::Snapshot(Some(value)) => {
            assert_eq!(value, json!({"bedroom": true, "kitchen": false}));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    handle.shutdown();
}

#[tokio::test]
async fn test_listener_reports_refused_subscription() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/lights.json"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "Permission denied"})),
        )
        .mount(&server)
        .await;

    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_retries: Some(0),
    };
    let cancel = CancellationToken::new();
    let handle = ListenerHandle::spawn(client, "lights", reconnect, cancel);
    let mut rx = handle.subscribe();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timely delivery")
        .expect("open channel");
    match event {
        StoreEvent::StreamError(message) => assert!(message.contains("Permission denied")),
        other => panic!("unexpected event: {other:?}"),
    }
}
