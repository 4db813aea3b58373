//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use reservation_store::{LockMode, TransactionOptions};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
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
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `LOCK_TIMEOUT_MS`: row-lock wait bound (default: `5000`)
/// - `TRANSACTION_TIMEOUT_MS`: whole-transaction bound (default: `15000`)
/// - `LOCK_MODE`: `wait` or `nowait` (default: `wait`)
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub lock_timeout_ms: u64,
    pub transaction_timeout_ms: u64,
    pub lock_mode: LockMode,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            lock_timeout_ms: env_or("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            transaction_timeout_ms: env_or(
                "TRANSACTION_TIMEOUT_MS",
                defaults.transaction_timeout_ms,
            ),
            lock_mode: env_or("LOCK_MODE", defaults.lock_mode),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the options applied to every reservation transaction.
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions::default()
            .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
            .with_transaction_timeout(Duration::from_millis(self.transaction_timeout_ms))
            .with_lock_mode(self.lock_mode)
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
            max_connections: 10,
            lock_timeout_ms: 5_000,
            transaction_timeout_ms: 15_000,
            lock_mode: LockMode::Wait,
        }
    }
}
