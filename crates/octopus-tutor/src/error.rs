//! Error types for the Octopus tutoring service.
//!
//! This module defines the error hierarchy for configuration loading, the
//! LLM collaborator, authentication, storage, and the session state machine.

use std::path::PathBuf;

/// A specialized `Result` type for Octopus tutoring operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while serving a tutoring session.
///
/// Variants are grouped by subsystem and include actionable suggestions
/// where the caller can do something about them.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your octopus.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // LLM Errors
    // ========================================================================
    /// LLM API returned an error (authentication, rate limiting, etc.).
    #[error("LLM API error ({kind}): {message}\n\nSuggestion: {suggestion}")]
    LlmApiError {
        /// The kind of API error.
        kind: LlmErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The LLM answered, but not with the JSON document that was asked for.
    #[error("LLM returned a malformed response: {message}")]
    LlmMalformedResponse {
        /// Description of what was wrong with the content.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// Missing or unusable credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated, but not allowed to perform the operation.
    #[error("Forbidden")]
    Forbidden,

    /// The requested record does not exist (or is not visible to the caller).
    #[error("{0}")]
    NotFound(String),

    /// The request conflicts with existing data.
    #[error("{0}")]
    Conflict(String),

    /// The request was well-formed JSON but its values are unacceptable.
    #[error("{0}")]
    InvalidInput(String),

    // ========================================================================
    // Session State Machine Errors
    // ========================================================================
    /// Invalid view transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current view.
        from: String,
        /// The attempted target view.
        to: String,
    },

    /// The solution was requested before every prerequisite was completed.
    #[error("Complete every prerequisite before viewing the solution ({remaining} remaining)")]
    SolutionLocked {
        /// Number of nodes still incomplete.
        remaining: usize,
    },

    // ========================================================================
    // Storage and Crypto Errors
    // ========================================================================
    /// SQLite failure.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The storage mutex was poisoned by a panicking thread.
    #[error("Storage is unavailable: connection lock poisoned")]
    StoragePoisoned,

    /// Password hashing or verification failed.
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    /// Token signing failed.
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Class report could not be built or written.
    #[error("Report error: {0}")]
    Report(#[from] octopus_report::ReportError),
}

/// Categories of LLM API errors for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Authentication failure (missing or invalid API key).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl LlmErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the API key configured for your LLM provider",
            Self::RateLimit => "Wait a moment and submit the problem again",
            Self::Server => "Retry later; the LLM service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::Other => "Check the LLM provider's status page",
        }
    }

    /// Classifies an HTTP status code returned by the LLM provider.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `LlmApiError` with automatic suggestion based on error kind.
    #[must_use]
    pub fn llm_api_error(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        let suggestion = kind.suggestion().to_string();
        Self::LlmApiError {
            kind,
            message: message.into(),
            suggestion,
        }
    }

    /// Creates a new `LlmMalformedResponse` error.
    #[must_use]
    pub fn llm_malformed(message: impl Into<String>) -> Self {
        Self::LlmMalformedResponse {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Short message suitable for showing to a learner.
    ///
    /// LLM API errors drop the suggestion block; everything else uses the
    /// `Display` form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::LlmApiError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LlmApiError {
                kind: LlmErrorKind::RateLimit | LlmErrorKind::Server | LlmErrorKind::Network,
                ..
            }
        )
    }

    /// Returns `true` if the caller, not the service, is at fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_)
                | Self::Forbidden
                | Self::NotFound(_)
                | Self::Conflict(_)
                | Self::InvalidInput(_)
                | Self::InvalidStateTransition { .. }
                | Self::SolutionLocked { .. }
        )
    }
}
