//! Error taxonomy shared by the coordinator and agent binaries.
//!
//! Mirrors the table in: transient errors are retried at the call
//! site, permanent errors propagate as a typed `ScanError` all the way to
//! the HTTP boundary or the scan result bundle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("address resolves to a private/reserved range: {0}")]
    PrivateIp(String),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("microsoft auth error: {0}")]
    Auth(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("stuck task recovered: {0}")]
    StuckTask(String),

    #[error("redis unavailable: {0}")]
    RedisUnavailable(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Stable machine-readable code, used as `connection.error.code` in
    /// result bundles.
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::Validation(_) => "VALIDATION_ERROR",
            ScanError::PrivateIp(_) => "PRIVATE_IP",
            ScanError::Proxy(_) => "PROXY_ERROR",
            ScanError::Network(_) => "NETWORK_ERROR",
            ScanError::Protocol(_) => "PROTOCOL_ERROR",
            ScanError::Tls(_) => "TLS_ERROR",
            ScanError::Auth(_) => "TOKEN_INVALID",
            ScanError::RateLimited { .. } => "RATE_LIMITED",
            ScanError::StuckTask(_) => "STUCK_TASK",
            ScanError::RedisUnavailable(_) => "REDIS_UNAVAILABLE",
            ScanError::NotFound => "NOT_FOUND",
            ScanError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(feature = "sqlx-row")]
impl From<sqlx::Error> for ScanError {
    fn from(e: sqlx::Error) -> Self {
        ScanError::Internal(e.to_string())
    }
}

#[cfg(feature = "redis-io")]
impl From<redis::RedisError> for ScanError {
    fn from(e: redis::RedisError) -> Self {
        ScanError::RedisUnavailable(e.to_string())
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ScanError::Network(format!("timeout: {e}"))
        } else {
            ScanError::Network(e.to_string())
        }
    }
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            ConnectionRefused => ScanError::Network("ECONNREFUSED".to_string()),
            TimedOut => ScanError::Network("ETIMEDOUT".to_string()),
            _ => ScanError::Network(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
