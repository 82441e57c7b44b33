use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 1;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;

/// Name of the transient, process-local job store.
pub const MEMORY_STORE: &str = "default";
/// Default name of the durable (SQLite-backed) job store.
pub const DURABLE_STORE: &str = "durable";

/// Top-level config (nightowl.toml + NIGHTOWL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NightowlConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Scheduler service: where it listens, how clients reach it, and how the
/// firing loop behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Endpoint used by RPC clients (front-end commands, task reconciliation).
    #[serde(default = "default_url")]
    pub url: String,
    /// Whole-request budget for one RPC call.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Scheduled instants older than this when the loop reaches them are skipped.
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
    #[serde(default = "default_durable_store")]
    pub durable_store: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            url: default_url(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            misfire_grace_secs: default_misfire_grace_secs(),
            durable_store: default_durable_store(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Upper bound on fan-out units of work running at the same time.
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_url() -> String {
    format!("http://{DEFAULT_BIND}:{DEFAULT_PORT}/")
}
fn default_rpc_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_misfire_grace_secs() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}
fn default_durable_store() -> String {
    DURABLE_STORE.to_string()
}
fn default_worker_concurrency() -> usize {
    DEFAULT_WORKER_CONCURRENCY
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.nightowl/nightowl.db", home)
}

impl NightowlConfig {
    /// Load config from a TOML file with NIGHTOWL_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. NIGHTOWL_CONFIG
    ///   3. ~/.nightowl/nightowl.toml
    ///
    /// Nested keys are split on `__`, e.g. `NIGHTOWL_SCHEDULER__PORT=9000`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("NIGHTOWL_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading config");

        Self::extract(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("NIGHTOWL_").split("__")),
        )
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> crate::error::Result<Self> {
        Self::extract(Figment::from(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::NightowlError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.nightowl/nightowl.toml", home)
}
