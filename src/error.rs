//! Crate-wide error types.
//!
//! Every fallible surface in this crate reports through [`CoreError`]; module
//! APIs return [`CoreResult`]. The variants map onto the four failure kinds
//! the library distinguishes: argument validation, configuration lookup,
//! component instantiation, and post-shutdown rejection. Failures raised by
//! user callbacks are not represented here: event consumers have their errors
//! logged and swallowed, while user backoff functions propagate through the
//! interval-function call itself.

use thiserror::Error;

/// Boxed error type for wrapping arbitrary failure causes
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used throughout the crate
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the core primitives
///
/// All variants are raised synchronously at the call site and leave state
/// unchanged.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An argument was out of range or otherwise malformed
    #[error("Invalid argument: {message}")]
    Validation { message: String },

    /// A named configuration lookup failed
    #[error("Configuration with name '{name}' does not exist")]
    ConfigurationNotFound { name: String },

    /// A user-supplied factory failed to produce a component
    #[error("Failed to instantiate component: {message}")]
    Instantiation {
        message: String,
        #[source]
        source: Option<BoxedError>,
    },

    /// A submission was rejected, e.g. after scheduler shutdown
    #[error("Submission rejected: {reason}")]
    Rejected { reason: String },
}

impl CoreError {
    /// Create a validation error with the given message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create a configuration-not-found error for the given name
    pub fn configuration_not_found(name: impl Into<String>) -> Self {
        Self::ConfigurationNotFound { name: name.into() }
    }

    /// Create an instantiation error without an underlying cause
    pub fn instantiation(message: impl Into<String>) -> Self {
        Self::Instantiation { message: message.into(), source: None }
    }

    /// Create an instantiation error wrapping an underlying cause
    pub fn instantiation_with_source(message: impl Into<String>, source: BoxedError) -> Self {
        Self::Instantiation { message: message.into(), source: Some(source) }
    }

    /// Create a rejection error with the given reason
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected { reason: reason.into() }
    }
}
