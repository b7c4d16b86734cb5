//! Error types shared across the engine and the backend adapters.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies backend failures for logging and observability.
///
/// Both kinds are retried on the hostname's retry interval; operator
/// intervention via a config reload is the recovery path for permanent
/// rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Network error, timeout, 5xx, auth challenge
    Transient,
    /// 4xx rejection or schema violation surfaced by the provider
    Permanent,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendErrorKind::Transient => write!(f, "transient"),
            BackendErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// A credential references a provider that is not registered
    #[error("unsupported provider: {0}")]
    UnknownProvider(String),

    /// A backend update failed
    #[error("{provider}: {message}")]
    Backend {
        /// Provider name the adapter registered under
        provider: String,
        /// Failure classification
        kind: BackendErrorKind,
        /// Human-readable cause
        message: String,
    },

    /// The discovery snapshot could not be taken
    #[error("discovery unavailable: {0}")]
    Discovery(String),

    /// Unparseable MAC or IP address in configuration or backend data
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// I/O errors (config file, command execution)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transient backend error (will be retried)
    pub fn backend_transient(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Backend {
            provider: provider.into(),
            kind: BackendErrorKind::Transient,
            message: msg.into(),
        }
    }

    /// Create a permanent backend error (also retried; see [`BackendErrorKind`])
    pub fn backend_permanent(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Backend {
            provider: provider.into(),
            kind: BackendErrorKind::Permanent,
            message: msg.into(),
        }
    }

    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create an invalid-address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Whether this error is a transient backend failure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Backend {
                kind: BackendErrorKind::Transient,
                ..
            }
        )
    }
}
