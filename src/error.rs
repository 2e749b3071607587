use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::executor::ExecutionReport;

/// Type alias for Result with CleanupError
pub type Result<T> = std::result::Result<T, CleanupError>;

/// How the core treats a failure reported by the mail store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderErrorKind {
    /// Network trouble, rate limiting, 5xx. Retried at the store boundary.
    Transient,
    /// Message not found, permission denied, bad request. Recorded, never retried.
    Permanent,
    /// Credentials no longer valid. Aborts the remaining plan.
    AuthExpired,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::Transient => "transient",
            ProviderErrorKind::Permanent => "permanent",
            ProviderErrorKind::AuthExpired => "auth-expired",
        };
        f.write_str(s)
    }
}

/// Error types for the inbox cleanup pipeline
#[derive(Error, Debug)]
pub enum CleanupError {
    /// Invalid rule set or configuration file. Raised before any store call.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A message record is missing required fields and cannot be classified
    #[error("Malformed message '{message_id}': {reason}")]
    ClassificationError { message_id: String, reason: String },

    /// The mail store rejected an operation
    #[error("Mail provider error ({kind}): {message}")]
    ProviderError {
        kind: ProviderErrorKind,
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Credentials expired mid-run. Carries whatever was recorded before the abort.
    #[error("Authentication expired: {message}")]
    AuthExpired {
        message: String,
        report: Option<Box<ExecutionReport>>,
    },

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CleanupError {
    pub fn transient(message: impl Into<String>) -> Self {
        CleanupError::ProviderError {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        CleanupError::ProviderError {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        CleanupError::ProviderError {
            kind: ProviderErrorKind::AuthExpired,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Classify this error into the provider taxonomy.
    ///
    /// Local failures (IO, serialization) count as permanent for the action
    /// that hit them; configuration and classification errors never reach
    /// the execution loop and return `None`.
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            CleanupError::ProviderError { kind, .. } => Some(*kind),
            CleanupError::AuthExpired { .. } => Some(ProviderErrorKind::AuthExpired),
            CleanupError::IoError(_) | CleanupError::SerializationError(_) => {
                Some(ProviderErrorKind::Permanent)
            }
            CleanupError::ConfigError(_) | CleanupError::ClassificationError { .. } => None,
        }
    }

    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        self.provider_kind() == Some(ProviderErrorKind::Transient)
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    pub fn is_auth_expired(&self) -> bool {
        self.provider_kind() == Some(ProviderErrorKind::AuthExpired)
    }

    /// Server-requested delay before retrying (HTTP 429 Retry-After)
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            CleanupError::ProviderError {
                retry_after_secs: Some(secs),
                ..
            } => Some(std::time::Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Partial report attached to an aborted run, if any
    pub fn partial_report(&self) -> Option<&ExecutionReport> {
        match self {
            CleanupError::AuthExpired { report, .. } => report.as_deref(),
            _ => None,
        }
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// Accepts delay-seconds ("120") or an HTTP-date. Returns `None` when the
/// header is absent, unparseable, or names a moment already in the past.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> Option<u64> {
    let value = response.headers().get("retry-after")?.to_str().ok()?;

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }

    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(std::time::SystemTime::now())
        .ok()
        .map(|d| d.as_secs())
}

impl From<google_gmail1::Error> for CleanupError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => CleanupError::ProviderError {
                        kind: ProviderErrorKind::Transient,
                        message,
                        retry_after_secs: parse_retry_after_header(response),
                    },
                    401 => CleanupError::auth_expired(message),
                    500..=599 => CleanupError::transient(message),
                    // 400, 403, 404 and anything else we don't recognise
                    _ => CleanupError::permanent(message),
                }
            }
            google_gmail1::Error::MissingToken(ref err) => {
                CleanupError::auth_expired(format!("Token unavailable: {}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                CleanupError::transient(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => CleanupError::transient(err.to_string()),
            google_gmail1::Error::BadRequest(ref err) => {
                CleanupError::permanent(format!("Bad request: {}", err))
            }
            _ => CleanupError::permanent(error.to_string()),
        }
    }
}
