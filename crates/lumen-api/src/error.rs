use thiserror::Error;

/// Top-level error type for the `lumen-api` crate.
///
/// Covers every failure mode across both wire surfaces: one-shot REST
/// operations and the streaming subscription. `lumen-core` folds these
/// into user-facing connection diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL construction error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── REST ────────────────────────────────────────────────────────
    /// Structured error from the database (parsed from the
    /// `{"error": "..."}` envelope).
    #[error("Database error (HTTP {status}): {message}")]
    Database { message: String, status: u16 },

    // ── Stream ──────────────────────────────────────────────────────
    /// The server revoked the subscription (a `cancel` or
    /// `auth_revoked` frame).
    #[error("Stream cancelled by server: {reason}")]
    StreamCancelled { reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` if this error means the caller lacks permission.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Database { status: 401 | 403, .. } | Self::StreamCancelled { .. }
        )
    }
}
