// End-to-end session tests against a mock database server.
//
// The session is built from a `SessionConfig` directly (the URL-domain
// check in `validate` has no business accepting a loopback mock).

use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lumen_core::{ConnectionStatus, ReconnectConfig, Session, SessionConfig};

// ── Helpers ─────────────────────────────────────────────────────────

fn config_for(server: &MockServer) -> SessionConfig {
    SessionConfig {
        database_url: server.uri().parse().expect("mock server uri"),
        api_key: SecretString::from("test-key".to_string()),
        project_id: "demo".into(),
        timeout: Duration::from_secs(5),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            max_retries: None,
        },
    }
}

fn sse_body(data: serde_json::Value) -> String {
    format!("event: put\ndata: {}\n\n", json!({"path": "/", "data": data}))
}

async fn mount_stream(server: &MockServer, data: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/lights.json"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(data), "text/event-stream"))
        .mount(server)
        .await;
}

async fn wait_for_status(
    session: &Session,
    pred: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let mut rx = session.status();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("status change in time")
        .expect("status channel open")
        .clone()
}

// ── Snapshot application ────────────────────────────────────────────

#[tokio::test]
async fn snapshot_connects_and_replaces_the_map() {
    let server = MockServer::start().await;
    mount_stream(&server, json!({"a": true, "b": false})).await;

    let session = Session::new(config_for(&server)).expect("session");
    assert_eq!(session.current_status(), ConnectionStatus::Loading);

    session.start().await;
    let status = wait_for_status(&session, ConnectionStatus::is_connected).await;
    assert_eq!(status, ConnectionStatus::Connected);

    let lights = session.lights_snapshot();
    assert_eq!(lights.len(), 2, "seed rooms must not survive a snapshot");
    assert_eq!(lights.get("a"), Some(&true));
    assert_eq!(lights.get("b"), Some(&false));

    session.stop().await;
}

#[tokio::test]
async fn absent_node_keeps_seed_states() {
    let server = MockServer::start().await;
    mount_stream(&server, serde_json::Value::Null).await;

    let session = Session::new(config_for(&server)).expect("session");
    session.start().await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        session.current_status(),
        ConnectionStatus::Loading,
        "no data means no connect"
    );
    assert_eq!(session.lights_snapshot().len(), 3);

    session.stop().await;
}

// ── Toggle dispatch ─────────────────────────────────────────────────

#[tokio::test]
async fn toggle_writes_the_negated_value() {
    let server = MockServer::start().await;
    mount_stream(&server, json!({"a": true, "b": false})).await;

    Mock::given(method("PUT"))
        .and(path("/lights/a.json"))
        .and(body_json(json!(false)))
        .respond_with(ResponseTemplate::new(200).set_body_string("false"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/lights/attic.json"))
        .and(body_json(json!(true)))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    let session = Session::new(config_for(&server)).expect("session");
    session.start().await;
    wait_for_status(&session, ConnectionStatus::is_connected).await;

    session.toggle("a").await; // a is on -> writes false
    session.toggle("attic").await; // unknown rooms count as off -> writes true

    // No optimistic local flip: the map changes only via the stream.
    assert_eq!(session.lights_snapshot().get("a"), Some(&true));

    session.stop().await;
}

#[tokio::test]
async fn toggle_before_connect_issues_no_write() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = Session::new(config_for(&server)).expect("session");
    // No start(): the session is still Loading.
    session.toggle("a").await;

    assert_eq!(session.current_status(), ConnectionStatus::Loading);
}

#[tokio::test]
async fn write_failure_leaves_status_and_map_untouched() {
    let server = MockServer::start().await;
    mount_stream(&server, json!({"a": true})).await;

    Mock::given(method("PUT"))
        .and(path("/lights/a.json"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "Permission denied"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = Session::new(config_for(&server)).expect("session");
    session.start().await;
    wait_for_status(&session, ConnectionStatus::is_connected).await;

    session.toggle("a").await;

    assert_eq!(session.current_status(), ConnectionStatus::Connected);
    assert_eq!(session.lights_snapshot().get("a"), Some(&true));

    session.stop().await;
}

// ── Subscription failures ───────────────────────────────────────────

#[tokio::test]
async fn subscription_error_preserves_last_known_states() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lights.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(json!({"a": true})), "text/event-stream"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/lights.json"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "Permission denied"})),
        )
        .mount(&server)
        .await;

    let session = Session::new(config_for(&server)).expect("session");
    session.start().await;
    wait_for_status(&session, ConnectionStatus::is_connected).await;

    // The first stream ends; the redial is refused.
    let status =
        wait_for_status(&session, |s| matches!(s, ConnectionStatus::Error { .. })).await;
    match status {
        ConnectionStatus::Error { message } => {
            assert!(message.contains("Permission denied"), "got: {message}");
        }
        other => panic!("unexpected status: {other:?}"),
    }
    assert_eq!(
        session.lights_snapshot().get("a"),
        Some(&true),
        "stale data stays visible"
    );

    session.stop().await;
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_makes_later_deliveries_unobservable() {
    let server = MockServer::start().await;
    mount_stream(&server, json!({"a": true})).await;

    let mut config = config_for(&server);
    // Park the redial far away so the only delivery is the first one.
    config.reconnect.initial_delay = Duration::from_secs(30);

    let session = Session::new(config).expect("session");
    session.start().await;
    wait_for_status(&session, ConnectionStatus::is_connected).await;

    session.stop().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.current_status(), ConnectionStatus::Connected);
    assert_eq!(session.lights_snapshot().get("a"), Some(&true));

    session.stop().await; // idempotent
}

#[tokio::test]
async fn restart_replaces_the_subscription() {
    let server = MockServer::start().await;
    mount_stream(&server, json!({"a": true})).await;

    let session = Session::new(config_for(&server)).expect("session");
    session.start().await;
    wait_for_status(&session, ConnectionStatus::is_connected).await;

    // A second start tears the first subscription down, then connects
    // again from scratch.
    session.start().await;
    let status = wait_for_status(&session, ConnectionStatus::is_connected).await;
    assert_eq!(status, ConnectionStatus::Connected);
    assert_eq!(session.lights_snapshot().get("a"), Some(&true));

    session.stop().await;
}
