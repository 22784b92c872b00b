//! Live subscription to a database node, with auto-reconnect.
//!
//! Opens the node's REST streaming endpoint and broadcasts complete
//! snapshots through a [`tokio::sync::broadcast`] channel. The server
//! sends granular `put`/`patch` frames; this module folds them into a
//! cached copy of the subscribed tree so every delivery downstream is
//! the full value, the way the upstream SDK's value listeners behave.
//! Reconnects with exponential backoff + jitter automatically.
//!
//! # Example
//!
//! ```rust,ignore
//! use lumen_api::{ListenerHandle, ReconnectConfig, RtdbClient, StoreEvent, TransportConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = RtdbClient::new(url, &TransportConfig::default())?;
//! let cancel = CancellationToken::new();
//! let handle = ListenerHandle::spawn(client, "lights", ReconnectConfig::default(), cancel);
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     match event {
//!         StoreEvent::Snapshot(value) => println!("{value:?}"),
//!         StoreEvent::StreamError(msg) => eprintln!("{msg}"),
//!     }
//! }
//!
//! handle.shutdown();
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::RtdbClient;
use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ── StoreEvent ───────────────────────────────────────────────────────

/// An update delivered to subscribers.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// Complete value of the subscribed node after folding in the
    /// latest server frame. `None` means the node does not exist.
    Snapshot(Option<Value>),

    /// The subscription failed. Delivery resumes once a reconnect
    /// succeeds; consumers decide what to show in the meantime.
    StreamError(String),
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum consecutive failed attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── ListenerHandle ───────────────────────────────────────────────────

/// Handle to a running subscription.
///
/// Cancelling the token (directly or via [`shutdown`](Self::shutdown))
/// stops the background loop; no event is broadcast afterwards.
pub struct ListenerHandle {
    event_rx: broadcast::Receiver<StoreEvent>,
    cancel: CancellationToken,
}

impl ListenerHandle {
    /// Spawn the subscription loop for `path`.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Subscribe to the receiver to consume events.
    pub fn spawn(
        client: RtdbClient,
        path: impl Into<String>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let path = path.into();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            listen_loop(client, path, event_tx, reconnect, task_cancel).await;
        });

        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// Multiple consumers can subscribe concurrently. A consumer that
    /// falls behind receives [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_rx.resubscribe()
    }

    /// Signal the background loop to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on failure, broadcast the error, back
/// off, reconnect.
async fn listen_loop(
    client: RtdbClient,
    path: String,
    event_tx: broadcast::Sender<StoreEvent>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = connect_and_read(&client, &path, &event_tx, &cancel) => {
                match result {
                    // Servers end healthy streams during rebalancing;
                    // redial after the initial delay, no error surfaced.
                    Ok(()) => {
                        tracing::info!("event stream ended, redialing");
                        attempt = 0;
                        if !wait_or_cancelled(reconnect.initial_delay, &cancel).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "event stream error");
                        let _ = event_tx.send(StoreEvent::StreamError(e.to_string()));

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "stream reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = backoff_delay(attempt, &reconnect);
                        tracing::info!(
                            delay_ms = delay.as_millis() as u64,
                            attempt,
                            "waiting before reconnect"
                        );
                        if !wait_or_cancelled(delay, &cancel).await {
                            break;
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }

    tracing::debug!("listen loop exiting");
}

/// Sleep for `delay`, returning `false` if cancellation arrived first.
async fn wait_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open one streaming connection and fold frames until it drops.
async fn connect_and_read(
    client: &RtdbClient,
    path: &str,
    event_tx: &broadcast::Sender<StoreEvent>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let resp = client.open_stream(path).await?;
    tracing::info!(path, "event stream connected");

    let mut parser = FrameParser::default();
    let mut cache: Option<Value> = None;
    let mut body = resp.bytes_stream();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            chunk = body.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        for frame in parser.push(&bytes) {
                            handle_frame(&frame, &mut cache, event_tx)?;
                        }
                    }
                    Some(Err(e)) => return Err(Error::Transport(e)),
                    None => {
                        tracing::info!("event stream closed by server");
                        return Ok(());
                    }
                }
            }
        }
    }
}

// ── Frame handling ───────────────────────────────────────────────────

/// Payload of a `put`/`patch` frame: a location and the new data there.
#[derive(Debug, Deserialize)]
struct UpdatePayload {
    path: String,
    data: Value,
}

/// Fold one frame into the cache, broadcasting the resulting snapshot.
///
/// Unparseable update frames are logged and skipped without killing the
/// connection; `cancel`/`auth_revoked` tear it down.
fn handle_frame(
    frame: &SseFrame,
    cache: &mut Option<Value>,
    event_tx: &broadcast::Sender<StoreEvent>,
) -> Result<(), Error> {
    match frame.event.as_str() {
        "put" | "patch" => {
            let payload: UpdatePayload = match serde_json::from_str(&frame.data) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        event = %frame.event,
                        "unparseable update frame, skipped"
                    );
                    return Ok(());
                }
            };

            if frame.event == "put" {
                apply_put(cache, &payload.path, payload.data);
            } else {
                apply_patch(cache, &payload.path, payload.data);
            }

            // Send errors just mean no subscribers right now.
            let _ = event_tx.send(StoreEvent::Snapshot(cache.clone()));
            Ok(())
        }
        "keep-alive" => {
            tracing::trace!("keep-alive");
            Ok(())
        }
        "cancel" => Err(Error::StreamCancelled {
            reason: "read permission revoked".into(),
        }),
        "auth_revoked" => Err(Error::StreamCancelled {
            reason: "credential expired or revoked".into(),
        }),
        other => {
            tracing::debug!(event = other, "unknown stream event, skipped");
            Ok(())
        }
    }
}

// ── Tree folding ─────────────────────────────────────────────────────

/// Fold a `put` into the cached tree.
///
/// An empty or `/` path replaces the root; `null` data deletes the
/// addressed node. Empty objects left behind are pruned, matching the
/// server's own storage model (empty nodes do not exist).
fn apply_put(cache: &mut Option<Value>, path: &str, data: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        *cache = if data.is_null() { None } else { Some(data) };
        return;
    }

    let root = cache.get_or_insert_with(|| Value::Object(Map::new()));
    set_node(root, &segments, data);
    if prune(root) {
        *cache = None;
    }
}

/// Fold a `patch` (a merge of children at `path`) into the cached tree.
fn apply_patch(cache: &mut Option<Value>, path: &str, data: Value) {
    let Value::Object(entries) = data else {
        tracing::debug!("patch payload is not an object, skipped");
        return;
    };

    let base = path.trim_matches('/');
    for (key, value) in entries {
        let child = if base.is_empty() {
            key
        } else {
            format!("{base}/{key}")
        };
        apply_put(cache, &child, value);
    }
}

/// Write (or delete, for `null`) the node at `segments`, creating
/// intermediate objects as needed. A scalar in the way is replaced.
fn set_node(node: &mut Value, segments: &[&str], data: Value) {
    let [head, rest @ ..] = segments else { return };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Some(map) = node.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        if data.is_null() {
            map.remove(*head);
        } else {
            map.insert((*head).to_owned(), data);
        }
        return;
    }

    let child = map
        .entry((*head).to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    set_node(child, rest, data);
}

/// Remove empty objects bottom-up. Returns `true` if `node` itself is
/// now an empty object.
fn prune(node: &mut Value) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    map.retain(|_, child| !prune(child));
    map.is_empty()
}

// ── SSE parsing ──────────────────────────────────────────────────────

/// One server-sent event: an `event:` name and its `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SseFrame {
    event: String,
    data: String,
}

/// Incremental SSE parser.
///
/// Frames are separated by a blank line; fields may arrive split across
/// arbitrary chunk boundaries, so bytes are buffered until a complete
/// frame is available.
#[derive(Debug, Default)]
struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    /// Feed a chunk, draining every complete frame it finishes.
    fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = find_blank_line(&self.buf) {
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&block);
            if let Some(frame) = parse_block(&text) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Parse one frame block. Returns `None` for blocks with no `event:`
/// field (comments, padding).
fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_owned());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // Comment lines (leading ':') and unknown fields are ignored.
    }

    event.map(|event| SseFrame {
        event,
        data: data.join("\n"),
    })
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with deterministic jitter.
///
/// `delay = min(initial * 2^attempt, max)` scaled by up to ±20% so
/// simultaneous clients don't redial in lockstep.
fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(16) as i32);
    let capped = base.min(config.max_delay.as_secs_f64());
    let jitter = 1.0 + 0.2 * (f64::from(attempt) * 2.399).sin();
    Duration::from_secs_f64((capped * jitter).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────
