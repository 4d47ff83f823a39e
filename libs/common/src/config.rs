//! Client configuration types.

use serde::{Deserialize, Serialize};

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Root every REST path is resolved against.
    #[serde(default = "default_api_root")]
    pub api_root: String,

    /// Directory holding the persisted session file.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Storage namespace; the session file is `<state_dir>/<namespace>.json`.
    #[serde(default = "default_storage_namespace")]
    pub storage_namespace: String,

    /// Transport settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Client-side request throttling.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Transport settings for the outbound HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_pool_idle")]
    pub pool_max_idle_per_host: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Per-second request budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// GET requests per second.
    #[serde(default = "default_reads_per_sec")]
    pub reads_per_sec: u32,

    /// POST requests per second.
    #[serde(default = "default_writes_per_sec")]
    pub writes_per_sec: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_api_root() -> String {
    "http://localhost:8000/api/v1".into()
}
fn default_state_dir() -> String {
    ".screener".into()
}
fn default_storage_namespace() -> String {
    "auth-storage".into()
}

fn default_timeout() -> u64 {
    15
}
fn default_pool_idle() -> usize {
    4
}
fn default_user_agent() -> String {
    concat!("screener-client/", env!("CARGO_PKG_VERSION")).into()
}

fn default_reads_per_sec() -> u32 {
    20
}
fn default_writes_per_sec() -> u32 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            pool_max_idle_per_host: default_pool_idle(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            reads_per_sec: default_reads_per_sec(),
            writes_per_sec: default_writes_per_sec(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_root: default_api_root(),
            state_dir: default_state_dir(),
            storage_namespace: default_storage_namespace(),
            http: HttpConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
