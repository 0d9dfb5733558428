//! Process configuration for the coordinator and its worker binaries.
//!
//! Loaded from an optional TOML file (`TMINUS_CONFIG_PATH`, default
//! `tminus.toml`) layered under environment variables, themselves loaded
//! from an optional `.env` file via `dotenv`. Every field has a sane
//! default so a bare `cargo run` against an empty environment still starts.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP bind address for the coordinator's RPC surface.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory holding one SQLite file per user (`<dir>/<user_id>.db`).
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Name of the environment variable carrying the base64 master key
    /// used for per-account token envelope encryption.
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,

    /// Queue consumer polling interval (milliseconds) between empty drains.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hours of scheduling-session inactivity before lazy expiry.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,

    /// Maximum delivery attempts before a write-queue message moves to DLQ.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rl_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_rl_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rl_burst")]
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_rl_max_requests(),
            window_secs: default_rl_window_secs(),
            burst: default_rl_burst(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_store_dir() -> String {
    "./data".to_string()
}
fn default_master_key_env() -> String {
    "TMINUS_MASTER_KEY".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_session_ttl_hours() -> i64 {
    24
}
fn default_max_delivery_attempts() -> u32 {
    5
}
fn default_rl_max_requests() -> u32 {
    100
}
fn default_rl_window_secs() -> u64 {
    60
}
fn default_rl_burst() -> u32 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            store_dir: default_store_dir(),
            master_key_env: default_master_key_env(),
            poll_interval_ms: default_poll_interval_ms(),
            session_ttl_hours: default_session_ttl_hours(),
            max_delivery_attempts: default_max_delivery_attempts(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Loads `.env` into the process environment, then the TOML file named
    /// by `TMINUS_CONFIG_PATH` (default `tminus.toml`), falling back to
    /// defaults when the file is absent.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let path = std::env::var("TMINUS_CONFIG_PATH").unwrap_or_else(|_| "tminus.toml".to_string());
        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("using default config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Path to one user's SQLite file under `store_dir`. Each user runs as
    /// an independent actor with its own database (spec §6.4); worker
    /// binaries are pointed at one user at a time.
    pub fn user_db_path(&self, user_id: &str) -> std::path::PathBuf {
        Path::new(&self.store_dir).join(format!("{user_id}.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert!(cfg.session_ttl_hours > 0);
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = Config::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.bind_addr, cfg.bind_addr);
    }
}
