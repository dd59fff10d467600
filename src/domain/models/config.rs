use serde::{Deserialize, Serialize};

use super::issue::Severity;
use super::verification::GatingPolicy;

/// Main configuration structure for PrintFix
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// External diagnosis, tool and render services
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Rate limiting for provider requests
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy for provider requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Default confidence gating applied to new jobs
    #[serde(default)]
    pub gating: GatingPolicy,

    /// Fix planner settings
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Diagnosis cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Upload acceptance settings
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".printfix/printfix.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub directory: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
            rotation: default_rotation(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Jobs processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How often the pool rescans storage for runnable jobs
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Times a step is re-read and retried after a state conflict
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

const fn default_concurrency() -> usize {
    2
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_max_conflict_retries() -> u32 {
    3
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

/// External service endpoints and per-call timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProvidersConfig {
    /// Base URL of the provider gateway
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_diagnosis_timeout_secs")]
    pub diagnosis_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,

    #[serde(default = "default_rationale_timeout_secs")]
    pub rationale_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8700".to_string()
}

const fn default_diagnosis_timeout_secs() -> u64 {
    120
}

const fn default_tool_timeout_secs() -> u64 {
    60
}

const fn default_render_timeout_secs() -> u64 {
    180
}

const fn default_rationale_timeout_secs() -> u64 {
    30
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            diagnosis_timeout_secs: default_diagnosis_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            render_timeout_secs: default_render_timeout_secs(),
            rationale_timeout_secs: default_rationale_timeout_secs(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Requests per second allowed
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Burst size for token bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_requests_per_second() -> u32 {
    5
}

const fn default_burst_size() -> u32 {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Fix planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PlannerConfig {
    /// Smart-auto skips issues below this severity
    #[serde(default = "default_severity_floor")]
    pub severity_floor: Severity,

    /// Ask the rationale provider to explain smart-auto decisions
    #[serde(default)]
    pub explain_decisions: bool,
}

const fn default_severity_floor() -> Severity {
    Severity::Warning
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            severity_floor: default_severity_floor(),
            explain_decisions: false,
        }
    }
}

/// Diagnosis cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

const fn default_cache_enabled() -> bool {
    true
}

const fn default_cache_capacity() -> u64 {
    1000
}

const fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Upload acceptance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IngestionConfig {
    #[serde(default = "default_max_upload_size_mb")]
    pub max_upload_size_mb: u64,
}

const fn default_max_upload_size_mb() -> u64 {
    100
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: default_max_upload_size_mb(),
        }
    }
}

impl IngestionConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }
}
