mod error;

pub use error::{DomainError, ValidationError};

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;
