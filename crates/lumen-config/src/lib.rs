//! Shared configuration loading for Lumen front-ends.
//!
//! TOML file + environment merging (figment), credential resolution
//! (env indirection + OS keyring + plaintext), and translation to
//! [`lumen_core::RawConfig`]. The core never reads the environment
//! itself -- a front-end loads here and hands the result to
//! `Session::initialize`.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lumen_core::RawConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Config file shape ───────────────────────────────────────────────

/// On-disk / environment configuration.
///
/// Field names mirror the deployment variables (`LUMEN_API_KEY`,
/// `LUMEN_DATABASE_URL`, ...). Everything is optional here; deciding
/// what "configured enough" means belongs to `lumen_core::validate`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    /// API key (plaintext -- prefer the keyring or `api_key_env`).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    pub auth_domain: Option<String>,
    pub database_url: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "lumen", "lumen").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("lumen");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from an explicit file path, still merging
/// `LUMEN_`-prefixed environment variables on top.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LUMEN_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, falling back to defaults when nothing is readable.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to the canonical path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the API key from the credential chain:
/// named env var -> OS keyring -> plaintext file value.
pub fn resolve_api_key(cfg: &Config) -> Option<String> {
    // 1. Config's api_key_env -> env var lookup
    if let Some(ref env_name) = cfg.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(val);
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new("lumen", "api-key") {
        if let Ok(secret) = entry.get_password() {
            return Some(secret);
        }
    }

    // 3. Plaintext in config
    cfg.api_key.clone()
}

// ── Translation ─────────────────────────────────────────────────────

/// Translate the loaded record into the core's raw parameter set.
///
/// Absent parameters stay absent -- the core derives its initial
/// connection status from what is (and is not) here.
pub fn to_raw_config(cfg: &Config) -> RawConfig {
    RawConfig {
        api_key: resolve_api_key(cfg),
        auth_domain: cfg.auth_domain.clone(),
        database_url: cfg.database_url.clone(),
        project_id: cfg.project_id.clone(),
        storage_bucket: cfg.storage_bucket.clone(),
        messaging_sender_id: cfg.messaging_sender_id.clone(),
        app_id: cfg.app_id.clone(),
    }
}
