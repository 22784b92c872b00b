// ── Session configuration & validation ──
//
// Raw parameters arrive from the environment or a config file;
// `validate` turns them into a `SessionConfig` or a structured
// refusal. Nothing here performs I/O and nothing panics -- bootstrap
// code derives the initial connection status from the returned value
// alone, with no exception path to handle.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use url::Url;

use lumen_api::ReconnectConfig;

/// Domain every database URL must sit under.
pub const REMOTE_DOMAIN: &str = "firebaseio.com";

/// Raw connection parameters as supplied by the deployment.
///
/// Everything is optional; a blank value counts as absent. What
/// "configured enough" means is decided by [`validate`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawConfig {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub database_url: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
}

/// A required parameter, named the way deployments spell it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigField {
    ApiKey,
    DatabaseUrl,
    ProjectId,
}

/// Structured validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// One or more required parameters are absent or blank.
    #[error("missing config: {}", field_list(.fields))]
    MissingFields { fields: Vec<ConfigField> },

    /// A parameter is present but unusable.
    #[error("invalid {field}: {reason}")]
    InvalidFormat { field: ConfigField, reason: String },
}

fn field_list(fields: &[ConfigField]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validated connection parameters for one session.
///
/// Built by [`validate`] (or directly by tests), consumed by
/// [`Session`](crate::Session) -- the core never reads the environment
/// itself.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Database root URL (e.g. `https://demo.firebaseio.com`).
    pub database_url: Url,
    /// Project API key. Carried for client identification; the store
    /// itself is not authenticated here.
    pub api_key: SecretString,
    /// Project identifier.
    pub project_id: String,
    /// Request timeout for one-shot reads and writes.
    pub timeout: Duration,
    /// Backoff tuning for the event stream.
    pub reconnect: ReconnectConfig,
}

/// Check that the minimal parameter set is present and well-formed.
///
/// All failure is returned, never raised: the caller maps
/// [`ConfigError::MissingFields`] to a "not configured" status and
/// [`ConfigError::InvalidFormat`] to a hard error.
pub fn validate(raw: &RawConfig) -> Result<SessionConfig, ConfigError> {
    let mut missing = Vec::new();
    if is_blank(raw.api_key.as_deref()) {
        missing.push(ConfigField::ApiKey);
    }
    if is_blank(raw.database_url.as_deref()) {
        missing.push(ConfigField::DatabaseUrl);
    }
    if is_blank(raw.project_id.as_deref()) {
        missing.push(ConfigField::ProjectId);
    }
    if !missing.is_empty() {
        return Err(ConfigError::MissingFields { fields: missing });
    }

    let raw_url = raw.database_url.as_deref().unwrap_or_default();
    let database_url: Url = raw_url
        .parse()
        .map_err(|e: url::ParseError| ConfigError::InvalidFormat {
            field: ConfigField::DatabaseUrl,
            reason: e.to_string(),
        })?;
    if !host_matches(&database_url) {
        return Err(ConfigError::InvalidFormat {
            field: ConfigField::DatabaseUrl,
            reason: format!("host must be under {REMOTE_DOMAIN}"),
        });
    }

    Ok(SessionConfig {
        database_url,
        api_key: SecretString::from(raw.api_key.clone().unwrap_or_default()),
        project_id: raw.project_id.clone().unwrap_or_default(),
        timeout: Duration::from_secs(30),
        reconnect: ReconnectConfig::default(),
    })
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|s| s.trim().is_empty())
}

fn host_matches(url: &Url) -> bool {
    url.host_str().is_some_and(|host| {
        host.strip_suffix(REMOTE_DOMAIN)
            .is_some_and(|prefix| prefix.is_empty() || prefix.ends_with('.'))
    })
}
