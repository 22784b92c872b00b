// ── Reactive light-state store ──
//
// Room -> on/off mapping behind a `watch` channel. An accepted
// snapshot replaces the whole map in one send, so readers never
// observe a partially applied update and rooms absent from the new
// snapshot cannot linger.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Room identifier -> light on/off.
pub type LightStates = HashMap<String, bool>;

/// Rooms shown before the first snapshot arrives, all off.
pub const DEFAULT_ROOMS: &[&str] = &["living_room", "bedroom", "kitchen"];

/// Reactive store for the light states of one session.
pub struct LightStore {
    snapshot: watch::Sender<Arc<LightStates>>,
    last_snapshot: watch::Sender<Option<DateTime<Utc>>>,
}

impl LightStore {
    pub fn new() -> Self {
        let seed: LightStates = DEFAULT_ROOMS
            .iter()
            .map(|room| ((*room).to_owned(), false))
            .collect();
        let (snapshot, _) = watch::channel(Arc::new(seed));
        let (last_snapshot, _) = watch::channel(None);

        Self {
            snapshot,
            last_snapshot,
        }
    }

    /// Current states (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<LightStates> {
        self.snapshot.borrow().clone()
    }

    /// Last snapshot-delivered state for one room.
    pub fn get(&self, room: &str) -> Option<bool> {
        self.snapshot.borrow().get(room).copied()
    }

    /// Replace the whole map and notify subscribers.
    pub(crate) fn replace(&self, states: LightStates) {
        // `send_modify`/`send_replace` update even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(states));
        self.last_snapshot.send_replace(Some(Utc::now()));
    }

    /// When the last snapshot was applied, `None` if never.
    pub fn last_snapshot_at(&self) -> Option<DateTime<Utc>> {
        *self.last_snapshot.borrow()
    }

    /// How long ago the last snapshot was applied, `None` if never.
    pub fn data_age(&self) -> Option<chrono::Duration> {
        self.last_snapshot_at().map(|t| Utc::now() - t)
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> StateStream {
        StateStream::new(self.snapshot.subscribe())
    }
}

impl Default for LightStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── StateStream ──────────────────────────────────────────────────────

/// A subscription to the light states.
///
/// Provides point-in-time snapshot access and change notification via
/// [`changed`](Self::changed) or conversion to a `Stream`.
pub struct StateStream {
    current: Arc<LightStates>,
    receiver: watch::Receiver<Arc<LightStates>>,
}

impl StateStream {
    fn new(receiver: watch::Receiver<Arc<LightStates>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation time.
    pub fn current(&self) -> &Arc<LightStates> {
        &self.current
    }

    /// The latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Arc<LightStates> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the owning store has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<LightStates>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> impl Stream<Item = Arc<LightStates>> {
        WatchStream::new(self.receiver)
    }
}
