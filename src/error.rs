//! Error types for the news pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Circuit breaker open for source: {0}")]
    CircuitBreakerOpen(String),

    #[error("API error: {code} - {message}")]
    ApiError {
        code: String,
        message: String,
    },

    #[error("Source not configured: {0}")]
    SourceNotConfigured(String),

    #[error("Invalid selector `{selector}`: {message}")]
    InvalidSelector {
        selector: String,
        message: String,
    },

    #[error("Invalid duration `{value}`: {message}")]
    InvalidDuration {
        value: String,
        message: String,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl PipelineError {
    /// Short label used for metrics and fetch reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HttpError(e) if e.is_timeout() => "timeout",
            Self::HttpError(_) => "http",
            Self::JsonError(_) => "json",
            Self::DatabaseError(_) => "database",
            Self::ConfigError(_) => "config",
            Self::IoError(_) => "io",
            Self::RateLimitExceeded => "rate_limit",
            Self::CircuitBreakerOpen(_) => "circuit_open",
            Self::ApiError { .. } => "api",
            Self::SourceNotConfigured(_) => "not_configured",
            Self::InvalidSelector { .. } => "selector",
            Self::InvalidDuration { .. } => "duration",
            Self::StorageError(_) => "storage",
            Self::ParseError(_) => "parse",
            Self::ShutdownRequested => "shutdown",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
