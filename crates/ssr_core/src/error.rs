//! Core SSR error types (pure - no I/O variants).

use thiserror::Error;

/// Maximum size for serialized props (5MB).
pub const MAX_PROPS_SIZE: usize = 5 * 1024 * 1024;

/// Core SSR errors (pure - no I/O variants).
///
/// Request validation failures and configuration failures both surface here.
/// Neither is retried: they are returned to the caller at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SsrCoreError {
    #[error("Component name cannot be blank")]
    BlankComponentName,

    #[error("Store name cannot be blank")]
    BlankStoreName,

    #[error("Invalid props: {0}")]
    InvalidProps(String),

    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("Render timeout must be positive")]
    InvalidTimeout,
}

impl SsrCoreError {
    /// Whether this error comes from a malformed render request rather than
    /// from configuration.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SsrCoreError::BlankComponentName
                | SsrCoreError::BlankStoreName
                | SsrCoreError::InvalidProps(_)
                | SsrCoreError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SsrCoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SsrCoreError::BlankComponentName.to_string(),
            "Component name cannot be blank"
        );
        assert_eq!(
            SsrCoreError::PayloadTooLarge { size: 10, max: 5 }.to_string(),
            "Payload too large: 10 bytes (max: 5 bytes)"
        );
    }

    #[test]
    fn test_validation_classification() {
        assert!(SsrCoreError::BlankComponentName.is_validation());
        assert!(SsrCoreError::InvalidProps("x".into()).is_validation());
        assert!(!SsrCoreError::InvalidWorkerCount.is_validation());
        assert!(!SsrCoreError::InvalidConfig("x".into()).is_validation());
    }
}
