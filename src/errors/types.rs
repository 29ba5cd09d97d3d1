//! Error type definitions for Teamarr.
//!
//! The hierarchy separates provider-facing failures (retriable vs permanent),
//! downstream IPTV-manager failures, and application-level errors. Unmatched
//! streams are deliberately *not* errors; see [`crate::models::NoMatchReason`].

use std::time::Duration;

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Sports-data provider errors that survived retry handling
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Downstream IPTV-manager errors
    #[error("Manager error: {0}")]
    Manager(#[from] ManagerError),

    /// Configuration errors (bad timezone, unknown league, invalid regex, ...)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A generation run is already in progress
    #[error("A generation run is already in progress")]
    AlreadyRunning,

    /// The run was canceled via the abort control
    #[error("Run canceled")]
    Canceled,

    /// Filesystem errors (XMLTV output, config file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of persisted values
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Failures surfaced by sports-data provider adapters.
///
/// The retry layer in `providers::http` consumes `Transient` and `RateLimited`
/// internally; callers only ever observe `Transient` once the retry budget is
/// exhausted. Missing entities are not represented here: adapters return
/// `Ok(None)` for them.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Network failure, timeout, or 5xx that exhausted the retry budget
    #[error("Transient provider failure: {message}")]
    Transient { message: String },

    /// The provider told us to back off (HTTP 429)
    #[error("Rate limited by provider{}", retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// Unretriable failure: malformed payload, 4xx other than 404/429
    #[error("Permanent provider failure{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Permanent { status: Option<u16>, message: String },

    /// No enabled adapter supports the requested league
    #[error("No provider supports league '{0}'")]
    UnsupportedLeague(String),

    /// The in-flight request was canceled
    #[error("Provider request canceled")]
    Canceled,
}

impl ProviderError {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent<S: Into<String>>(status: Option<u16>, message: S) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    /// Whether the retry layer may attempt this request again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }
}

/// Failures talking to the downstream IPTV manager.
///
/// These never abort a run; the lifecycle step that hit them is skipped and
/// the run reports partial success.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Manager authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Manager request failed: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("Manager unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected manager response: {message}")]
    UnexpectedResponse { message: String },
}

impl ManagerError {
    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::UnexpectedResponse {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(ProviderError::transient("timeout").is_retriable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retriable());
        assert!(!ProviderError::permanent(Some(400), "bad request").is_retriable());
        assert!(!ProviderError::UnsupportedLeague("xfl".into()).is_retriable());
        assert!(!ProviderError::Canceled.is_retriable());
    }
}
