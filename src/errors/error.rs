use std::fmt;
use serde::Serialize;
use thiserror::Error;

/// Domain-level errors raised by the compression engine
#[derive(Debug, Error, Clone, Serialize)]
pub enum DomainError {
    #[error("Could not read input PDF: {0}")]
    InputRead(String),

    #[error("External tool failed: {0}")]
    ToolFailure(String),

    #[error("Transform step '{step}' failed: {message}")]
    TransformStep {
        step: String,
        message: String,
    },

    #[error("Could not write output PDF: {0}")]
    OutputWrite(String),

    #[error("Compression cancelled")]
    Cancelled,

    #[error("Compression timed out after {0}s")]
    TimedOut(u64),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Errors that end a request. Tool and transform failures are recovered
    /// inside the engine and only surface through logs.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DomainError::ToolFailure(_) | DomainError::TransformStep { .. })
    }

    pub fn transform_step(step: &str, message: impl fmt::Display) -> Self {
        DomainError::TransformStep {
            step: step.to_string(),
            message: message.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Error, Clone, Serialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required {
        field: String,
    },

    #[error("Field '{field}' must be between {min} and {max}")]
    Range {
        field: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}' contains an invalid value: {reason}")]
    InvalidValue {
        field: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Custom(String),
}

impl ValidationError {
    pub fn required(field: &str) -> Self {
        Self::Required {
            field: field.to_string(),
        }
    }

    pub fn range<T: fmt::Display>(field: &str, min: T, max: T) -> Self {
        Self::Range {
            field: field.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn custom(message: &str) -> Self {
        Self::Custom(message.to_string())
    }
}
