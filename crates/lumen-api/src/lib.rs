// lumen-api: raw wire client for the realtime database. One-shot node
// reads/writes over REST plus the long-lived event stream; lumen-core
// turns these into connection state and light data.

pub mod client;
pub mod error;
pub mod listen;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::RtdbClient;
pub use error::Error;
pub use listen::{ListenerHandle, ReconnectConfig, StoreEvent};
pub use transport::TransportConfig;
