// ── Toggle dispatch ──
//
// User intents arrive here. A write is gated on the live connection
// state at call time and is never reflected locally -- the store
// changes only when the subscription echoes the new value back.

use tracing::{debug, warn};

use crate::session::{LIGHTS_PATH, Session};

impl Session {
    /// Flip a room's light.
    ///
    /// No-op unless the session is currently connected. The value
    /// written is the negation of the last snapshot-delivered state;
    /// unknown rooms count as off. A concurrent writer can win the
    /// race -- last write wins at the store, there is no
    /// compare-and-swap. Failures are logged and swallowed.
    pub async fn toggle(&self, room: &str) {
        if !self.current_status().is_connected() {
            debug!(room, "toggle ignored: not connected");
            return;
        }
        let Some(client) = self.inner.client.as_ref() else {
            debug!(room, "toggle ignored: no client");
            return;
        };

        let next = !self.inner.store.get(room).unwrap_or(false);
        let node = format!("{LIGHTS_PATH}/{room}");
        debug!(room, value = next, "toggling light");

        if let Err(e) = client.put(&node, &next).await {
            warn!(room, error = %e, "light write failed");
        }
    }
}
