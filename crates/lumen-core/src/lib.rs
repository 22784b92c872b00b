// lumen-core: connection lifecycle and state synchronization between
// light-store consumers and the realtime database.

pub mod config;
mod dispatch;
pub mod session;
pub mod status;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConfigError, ConfigField, RawConfig, SessionConfig, validate};
pub use session::{LIGHTS_PATH, Session};
pub use status::ConnectionStatus;
pub use store::{DEFAULT_ROOMS, LightStates, LightStore, StateStream};

// Wire types consumers are expected to touch.
pub use lumen_api::{Error as StoreError, ReconnectConfig, StoreEvent};
