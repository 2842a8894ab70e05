//! Error types for federated search operations
//!
//! This module defines the crate error type used for configuration and
//! execution failures, together with the response-level [`ErrorMessage`] that
//! failed targets are converted into. Per-target failures never escape a
//! federation call as `Err`; they are turned into error messages attached to
//! the merged result.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Main error type for all federation operations
#[derive(Debug, Error)]
pub enum FederationError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persisted data failed an integrity check
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// A query named a source that is not configured
    #[error("Could not resolve source ref '{name}'. Valid source refs are {valid}")]
    UnknownSource { name: String, valid: String },

    /// A query named a provider that is not configured
    #[error("Could not resolve provider ref '{name}'. Valid provider refs are {valid}")]
    UnknownProvider { name: String, valid: String },

    /// A chain id could not be found in the registry
    #[error("No chain registered with id '{0}'")]
    UnknownChain(String),

    /// A query property held a value that could not be interpreted
    #[error("Invalid value '{value}' for property '{name}': {reason}")]
    InvalidProperty {
        name: String,
        value: String,
        reason: String,
    },

    /// A chain failed while executing
    #[error("Error in execution of chain '{chain}': {reason}")]
    Chain { chain: String, reason: String },

    /// A chain did not produce a result before its deadline
    #[error("Error in execution of chain '{chain}': Chain timed out after {elapsed_ms} ms")]
    Timeout { chain: String, elapsed_ms: u64 },

    /// Filling hits through a chain failed
    #[error("Error filling hits through chain '{chain}': {reason}")]
    Fill { chain: String, reason: String },

    /// A chain panicked while executing
    #[error("Chain '{chain}' panicked: {message}")]
    Panicked { chain: String, message: String },
}

impl FederationError {
    /// Create a detailed config error
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config(format!("{} - {}: {}", field.into(), reason.into(), suggestion.into()))
    }

    /// Create a chain execution error
    pub fn chain_error(chain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Chain {
            chain: chain.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error for a chain
    pub fn timeout(chain: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            chain: chain.into(),
            elapsed_ms,
        }
    }

    /// Create a fill error for a chain
    pub fn fill_error(chain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fill {
            chain: chain.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid property error
    pub fn invalid_property(name: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// The response code this error is reported with
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::UnknownSource { .. } | Self::UnknownProvider { .. } | Self::InvalidProperty { .. } => {
                ErrorCode::InvalidQueryParameter
            }
            Self::Config(_) | Self::UnknownChain(_) => ErrorCode::ServerIsMisconfigured,
            Self::Chain { .. } => ErrorCode::BackendCommunicationError,
            Self::Fill { .. } | Self::Panicked { .. } => ErrorCode::ErrorInPlugin,
            Self::Io(_) | Self::Serialization(_) | Self::Corruption(_) => ErrorCode::InternalServerError,
        }
    }

    /// Whether this error describes a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Convert into a response-level error message attributed to `source`
    pub fn to_error_message(&self, source: impl Into<String>) -> ErrorMessage {
        let message = match self {
            Self::Timeout { .. } => ErrorMessage::TIMED_OUT.to_string(),
            Self::UnknownSource { .. } | Self::UnknownProvider { .. } | Self::InvalidProperty { .. } => {
                "Invalid query parameter".to_string()
            }
            Self::Chain { .. } => "Backend communication error".to_string(),
            Self::Fill { .. } | Self::Panicked { .. } => "Error in plugin".to_string(),
            _ => "Internal server error".to_string(),
        };

        ErrorMessage {
            code: self.code(),
            message,
            detailed_message: Some(self.to_string()),
            source: Some(source.into()),
        }
    }
}

/// Stable numeric error codes exposed in responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NullQuery,
    IllegalQuery,
    InvalidQueryParameter,
    Unspecified,
    ErrorInPlugin,
    ServerIsMisconfigured,
    BackendCommunicationError,
    Timeout,
    InternalServerError,
}

impl ErrorCode {
    /// Numeric value of this code
    pub fn as_u32(self) -> u32 {
        match self {
            Self::NullQuery => 1,
            Self::IllegalQuery => 3,
            Self::InvalidQueryParameter => 4,
            Self::Unspecified => 5,
            Self::ErrorInPlugin => 6,
            Self::ServerIsMisconfigured => 8,
            Self::BackendCommunicationError => 9,
            Self::Timeout => 12,
            Self::InternalServerError => 18,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// An error as it appears in a search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code
    pub code: ErrorCode,
    /// Short human readable message
    pub message: String,
    /// Longer message identifying what failed
    pub detailed_message: Option<String>,
    /// Id of the target (or component) the error is attributed to
    pub source: Option<String>,
}

impl ErrorMessage {
    /// Fixed message used for every timeout
    pub const TIMED_OUT: &'static str = "Timed out";

    /// Create an error message without source or details
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detailed_message: None,
            source: None,
        }
    }

    /// Create a timeout message attributed to a target
    pub fn timeout(source: impl Into<String>, detailed_message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Timeout,
            message: Self::TIMED_OUT.to_string(),
            detailed_message: Some(detailed_message.into()),
            source: Some(source.into()),
        }
    }

    /// Set the detailed message
    pub fn with_detail(mut self, detailed_message: impl Into<String>) -> Self {
        self.detailed_message = Some(detailed_message.into());
        self
    }

    /// Set the source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Whether this is a timeout
    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }
}

impl Display for ErrorMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "{}: ", source)?;
        }
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(detail) = &self.detailed_message {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}
