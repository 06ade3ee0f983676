//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Ember engine.
//! All errors implement the `EmberErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Delivery
//!
//! - `Input` and `State` are returned synchronously when a request is submitted
//!   and are never queued.
//! - `Backend`, `Timeout` and `Shutdown` are delivered only through a request's
//!   result slot and never fail sibling requests in the same batch.
//! - `Resource` reports non-fatal context loss forced by memory pressure.

use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Trait for Ember error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait EmberErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and never echoes prompt text
    /// or backend output.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require manual intervention or a service restart.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use ember_sdk::errors::{EmberErrorExt, EngineError};
/// use std::time::Duration;
///
/// let error = EngineError::Timeout { waited: Duration::from_secs(30) };
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// assert!(!EngineError::Shutdown.is_recoverable());
/// ```
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    // Submission errors
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Invalid state: {0}")]
    State(String),

    // Processing errors
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Request timed out after {waited:?}")]
    Timeout { waited: Duration },

    #[error("Resource pressure: {0}")]
    Resource(String),

    #[error("Service shutting down")]
    Shutdown,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic IO error, stored as text so results stay cloneable
    #[error("IO error: {0}")]
    Io(String),
}

impl EngineError {
    /// Shorthand for the error returned while no model is loaded
    pub fn no_model() -> Self {
        Self::State("no model loaded".to_string())
    }

    /// Returns true for errors that are reported synchronously at submission
    pub fn is_submission_error(&self) -> bool {
        matches!(self, Self::Input(_) | Self::State(_))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl EmberErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Input(_) => "Provide non-empty input text",
            Self::State(_) => "Load a model before submitting requests",
            Self::Backend(_) => "The model backend failed. Try again or reload the model",
            Self::Timeout { .. } => "The request took too long. Try again later",
            Self::Resource(_) => "Conversation history was dropped to free memory",
            Self::Shutdown => "The service is shutting down",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Shutdown | Self::Config(_))
    }
}
