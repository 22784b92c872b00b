// ── Session abstraction ──
//
// Full lifecycle management for one link to the remote store:
// bootstrap validation, the live subscription, and snapshot
// application into the light store. All shared state hangs off one
// session object; there are no module-level globals.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use lumen_api::{ListenerHandle, RtdbClient, StoreEvent, TransportConfig};

use crate::config::{self, ConfigError, RawConfig, SessionConfig};
use crate::status::ConnectionStatus;
use crate::store::{LightStates, LightStore, StateStream};

/// Root node that holds the per-room light states.
pub const LIGHTS_PATH: &str = "lights";

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Owns the connection
/// status, the light store, and the single live subscription.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    pub(crate) config: Option<SessionConfig>,
    pub(crate) client: Option<RtdbClient>,
    pub(crate) store: LightStore,
    pub(crate) status: watch::Sender<ConnectionStatus>,
    listener: Mutex<Option<ListenGuard>>,
}

/// A running subscription: its cancel token and the task applying its
/// events.
struct ListenGuard {
    cancel: CancellationToken,
    sync_task: JoinHandle<()>,
}

impl Session {
    /// Bootstrap a session from raw parameters.
    ///
    /// Never fails: validation and client-construction problems are
    /// folded into the initial [`ConnectionStatus`] so callers can
    /// render a diagnosis instead of handling an error path.
    pub fn initialize(raw: &RawConfig) -> Self {
        match config::validate(raw) {
            Ok(cfg) => match Self::new(cfg) {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, "client construction failed");
                    Self::offline(ConnectionStatus::Error {
                        message: format!("init failed: {e}"),
                    })
                }
            },
            Err(err @ ConfigError::MissingFields { .. }) => {
                warn!("configuration incomplete: {err}");
                Self::offline(ConnectionStatus::Disconnected {
                    reason: Some(err.to_string()),
                })
            }
            Err(err) => {
                warn!("configuration rejected: {err}");
                Self::offline(ConnectionStatus::Error {
                    message: err.to_string(),
                })
            }
        }
    }

    /// Create a session from validated configuration.
    ///
    /// Initial status is [`Loading`](ConnectionStatus::Loading); call
    /// [`start()`](Self::start) to open the subscription. Fails only
    /// if the HTTP client cannot be built.
    pub fn new(config: SessionConfig) -> Result<Self, lumen_api::Error> {
        let transport = TransportConfig {
            timeout: config.timeout,
            ..TransportConfig::default()
        };
        let client = RtdbClient::new(config.database_url.clone(), &transport)?;
        let (status, _) = watch::channel(ConnectionStatus::Loading);

        Ok(Self {
            inner: Arc::new(SessionInner {
                config: Some(config),
                client: Some(client),
                store: LightStore::new(),
                status,
                listener: Mutex::new(None),
            }),
        })
    }

    /// A session with no usable client, pinned at `status`.
    fn offline(status: ConnectionStatus) -> Self {
        let (status, _) = watch::channel(status);
        Self {
            inner: Arc::new(SessionInner {
                config: None,
                client: None,
                store: LightStore::new(),
                status,
                listener: Mutex::new(None),
            }),
        }
    }

    // ── Subscription lifecycle ───────────────────────────────────────

    /// Open the live subscription on the `lights` node.
    ///
    /// At most one subscription is active per session: any prior one
    /// is torn down first. A session without a usable client is left
    /// untouched -- its status already says why.
    pub async fn start(&self) {
        let Some(client) = self.inner.client.clone() else {
            debug!("start ignored: no client");
            return;
        };
        self.stop().await;

        let reconnect = self
            .inner
            .config
            .as_ref()
            .map(|c| c.reconnect.clone())
            .unwrap_or_default();
        let cancel = CancellationToken::new();
        let listener = ListenerHandle::spawn(client, LIGHTS_PATH, reconnect, cancel.clone());
        let events = listener.subscribe();

        let inner = Arc::clone(&self.inner);
        let sync_task = tokio::spawn(sync_task(inner, events, cancel.clone()));

        *self.inner.listener.lock().await = Some(ListenGuard { cancel, sync_task });
        info!("subscription started");
    }

    /// Tear down the subscription. Idempotent.
    ///
    /// On return, no snapshot or error event can mutate the store or
    /// status until the next [`start()`](Self::start).
    pub async fn stop(&self) {
        let guard = self.inner.listener.lock().await.take();
        if let Some(guard) = guard {
            guard.cancel.cancel();
            let _ = guard.sync_task.await;
            debug!("subscription stopped");
        }
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to connection status changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// The status right now.
    pub fn current_status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Access the light store.
    pub fn store(&self) -> &LightStore {
        &self.inner.store
    }

    /// Subscribe to light-state changes.
    pub fn lights(&self) -> StateStream {
        self.inner.store.subscribe()
    }

    /// Current light states (cheap `Arc` clone).
    pub fn lights_snapshot(&self) -> Arc<LightStates> {
        self.inner.store.snapshot()
    }

    /// The validated configuration, when one exists.
    pub fn config(&self) -> Option<&SessionConfig> {
        self.inner.config.as_ref()
    }
}

// ── Background sync task ─────────────────────────────────────────────

/// Apply subscription events to the store and status until cancelled.
async fn sync_task(
    inner: Arc<SessionInner>,
    mut events: broadcast::Receiver<StoreEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(StoreEvent::Snapshot(Some(value))) => apply_snapshot(&inner, &value),
                Ok(StoreEvent::Snapshot(None)) => {
                    trace!("node absent, keeping last known states");
                }
                Ok(StoreEvent::StreamError(message)) => {
                    warn!(%message, "subscription error");
                    inner.status.send_replace(ConnectionStatus::Error { message });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Replace the store contents and mark the link connected.
fn apply_snapshot(inner: &SessionInner, value: &serde_json::Value) {
    let Some(states) = decode_states(value) else {
        warn!("snapshot is not a room map, ignored");
        return;
    };
    if states.is_empty() {
        trace!("empty snapshot, keeping last known states");
        return;
    }

    inner.store.replace(states);
    inner.status.send_replace(ConnectionStatus::Connected);
}

/// Decode a raw tree into room -> on/off, skipping non-boolean
/// entries. `None` if the tree is not a map at all.
fn decode_states(value: &serde_json::Value) -> Option<LightStates> {
    let entries = value.as_object()?;
    Some(
        entries
            .iter()
            .filter_map(|(room, state)| match state.as_bool() {
                Some(on) => Some((room.clone(), on)),
                None => {
                    debug!(%room, "non-boolean entry in snapshot, skipped");
                    None
                }
            })
            .collect(),
    )
}
