//! Error types for the scanpoint core library.
//!
//! Scan failures that the operator sees (an invalid ticket, a timeout) are not
//! errors in this sense: they are outcomes, classified by
//! [`ErrorKind`](crate::classify::ErrorKind). The types here cover what goes
//! wrong around the scan pipeline itself.
//!
//! - [`ApiError`] - talking to the ticketing service
//! - [`ConfigError`] - loading and validating configuration
//! - [`ScanError`] - the unified error for everything else
//!
//! # Example
//!
//! ```rust
//! use scanpoint_core::error::{Result, ScanError};
//!
//! fn require_event(event_id: &str) -> Result<()> {
//!     if event_id.is_empty() {
//!         return Err(ScanError::NoEventSelected);
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Failures talking to the ticketing service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be sent or the response could not be read.
    #[error("Ticketing service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The configured base URL cannot carry path segments.
    #[error("Ticketing service URL '{0}' cannot be used as a base URL")]
    InvalidBaseUrl(String),

    /// The response body was not the JSON we expected.
    #[error("Ticketing service returned malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// The service answered with a status and a body we could not interpret.
    #[error("Ticketing service returned HTTP {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        body: String,
    },
}

impl ApiError {
    /// Returns `true` if the failure happened before any response arrived.
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if the request timed out at the HTTP client level.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_timeout())
    }
}

/// Failures loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("Invalid configuration for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("Configuration has {} problems", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// The unified error type for scanpoint operations.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Talking to the ticketing service failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An outcome collaborator (UI, navigation) failed to accept a result.
    #[error("Outcome handler failed: {0}")]
    Sink(#[source] anyhow::Error),

    /// No event has been selected for the scan session.
    #[error("No event selected. Choose an event before scanning.")]
    NoEventSelected,
}

/// A specialized [`Result`] type for scanpoint operations.
pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Returns `true` if this error came from the ticketing service.
    #[inline]
    #[must_use]
    pub fn is_api_error(&self) -> bool {
        matches!(self, Self::Api(_))
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns a machine-readable error code for logs.
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Api(ApiError::Transport(_)) => "API_TRANSPORT",
            Self::Api(ApiError::InvalidBaseUrl(_)) => "API_INVALID_BASE_URL",
            Self::Api(ApiError::Decode(_)) => "API_DECODE",
            Self::Api(ApiError::UnexpectedStatus { .. }) => "API_UNEXPECTED_STATUS",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Sink(_) => "SINK_FAILED",
            Self::NoEventSelected => "NO_EVENT_SELECTED",
        }
    }
}
