//! Configuration for Outreach

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Execution engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Account quota and backoff configuration
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// External platform gateway configuration
    #[serde(default)]
    pub platform: PlatformConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts a target gets for retryable failures before it is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// A drained task whose failed/total ratio exceeds this ends as `failed`
    #[serde(default = "default_failure_ratio_threshold")]
    pub failure_ratio_threshold: f64,

    /// Upper bound for a single platform call
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    /// Wait when a task has no pending targets but some are still in flight
    #[serde(default = "default_idle_wait")]
    pub idle_wait_ms: u64,

    /// First wait when no account is eligible
    #[serde(default = "default_starvation_initial")]
    pub starvation_backoff_initial_ms: u64,

    /// Ceiling for the starvation wait
    #[serde(default = "default_starvation_max")]
    pub starvation_backoff_max_ms: u64,

    /// Reservation races tolerated per target before it is requeued
    #[serde(default = "default_max_reserve_attempts")]
    pub max_reserve_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            failure_ratio_threshold: default_failure_ratio_threshold(),
            action_timeout_secs: default_action_timeout(),
            idle_wait_ms: default_idle_wait(),
            starvation_backoff_initial_ms: default_starvation_initial(),
            starvation_backoff_max_ms: default_starvation_max(),
            max_reserve_attempts: default_max_reserve_attempts(),
        }
    }
}

fn default_max_attempts() -> i32 {
    3
}

fn default_failure_ratio_threshold() -> f64 {
    0.5
}

fn default_action_timeout() -> u64 {
    30
}

fn default_idle_wait() -> u64 {
    1000
}

fn default_starvation_initial() -> u64 {
    1000
}

fn default_starvation_max() -> u64 {
    30_000
}

fn default_max_reserve_attempts() -> u32 {
    3
}

/// Account quota and backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// First cooldown for rate-limited or unknown outcomes
    #[serde(default = "default_backoff_base")]
    pub default_backoff_base_secs: i64,

    /// Ceiling for the escalating cooldown
    #[serde(default = "default_backoff_max")]
    pub default_backoff_max_secs: i64,

    /// Cooldown applied when the platform restricts an account
    #[serde(default = "default_restricted_cooldown")]
    pub restricted_cooldown_secs: i64,

    /// Offset of the platform-local midnight at which daily counters reset
    #[serde(default)]
    pub reset_utc_offset_minutes: i32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_backoff_base_secs: default_backoff_base(),
            default_backoff_max_secs: default_backoff_max(),
            restricted_cooldown_secs: default_restricted_cooldown(),
            reset_utc_offset_minutes: 0,
        }
    }
}

fn default_backoff_base() -> i64 {
    300
}

fn default_backoff_max() -> i64 {
    4 * 60 * 60
}

fn default_restricted_cooldown() -> i64 {
    12 * 60 * 60
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Sleep between polls when no task is ready
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Interval between maintenance passes
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// Age after which an in-progress claim is considered abandoned
    #[serde(default = "default_stale_claim")]
    pub stale_claim_secs: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval(),
            maintenance_interval_secs: default_maintenance_interval(),
            stale_claim_secs: default_stale_claim(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_maintenance_interval() -> u64 {
    60
}

fn default_stale_claim() -> i64 {
    600
}

/// External platform gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Gateway base URL
    #[serde(default = "default_platform_url")]
    pub base_url: String,

    /// Bearer token for the gateway
    pub api_token: Option<String>,

    /// HTTP request timeout in seconds; must stay below `engine.action_timeout_secs`
    #[serde(default = "default_platform_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            api_token: None,
            request_timeout_secs: default_platform_timeout(),
        }
    }
}

fn default_platform_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_platform_timeout() -> u64 {
    20
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API bind address
    #[serde(default = "default_api_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
        }
    }
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from a file, with `OUTREACH__SECTION__KEY` environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        ::config::Config::builder()
            .add_source(::config::File::from(path.to_path_buf()))
            .add_source(::config::Environment::with_prefix("OUTREACH").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from the given path or the default locations
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let paths = [
            PathBuf::from("./outreach.toml"),
            PathBuf::from("/etc/outreach/outreach.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Check values that would make the engine misbehave
    pub fn validate(&self) -> crate::Result<()> {
        if self.engine.max_attempts < 1 {
            return Err(crate::Error::Config(
                "engine.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.engine.failure_ratio_threshold) {
            return Err(crate::Error::Config(
                "engine.failure_ratio_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.quota.default_backoff_base_secs > self.quota.default_backoff_max_secs {
            return Err(crate::Error::Config(
                "quota.default_backoff_base_secs exceeds default_backoff_max_secs".to_string(),
            ));
        }
        // The client must give up first so an unanswered request is never billed as executed
        if self.platform.request_timeout_secs >= self.engine.action_timeout_secs {
            return Err(crate::Error::Config(
                "platform.request_timeout_secs must be below engine.action_timeout_secs"
                    .to_string(),
            ));
        }
        if self.worker.workers == 0 {
            return Err(crate::Error::Config(
                "worker.workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
