//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::RetryPolicy;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset means the in-memory store
/// - `SAGA_STEP_TIMEOUT_MS`: first wait for a participant (default: `30000`)
/// - `SAGA_MAX_ATTEMPTS`: sends per command (default: `3`)
/// - `SAGA_MAX_BACKOFF_MS`: longest single wait (default: `300000`)
/// - `SAGA_SWEEP_INTERVAL_MS`: background sweep period (default: `1000`)
/// - `SAGA_RETENTION_SECS`: how long finished sagas stay hot (default: `86400`)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub step_timeout: Duration,
    pub max_attempts: u32,
    pub max_backoff: Duration,
    pub sweep_interval: Duration,
    pub retention: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            step_timeout: parsed("SAGA_STEP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.step_timeout),
            max_attempts: lookup("SAGA_MAX_ATTEMPTS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_attempts),
            max_backoff: parsed("SAGA_MAX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            sweep_interval: parsed("SAGA_SWEEP_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            retention: parsed("SAGA_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the orchestrator retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.step_timeout, self.max_attempts, self.max_backoff)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            step_timeout: Duration::from_millis(30_000),
            max_attempts: 3,
            max_backoff: Duration::from_millis(300_000),
            sweep_interval: Duration::from_millis(1_000),
            retention: Duration::from_secs(86_400),
        }
    }
}
