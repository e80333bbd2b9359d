//! Execution-pool errors, including I/O and JavaScript failures.

use ssrkit_core::SsrCoreError;
use thiserror::Error;

/// Errors raised at the pool boundary.
#[derive(Error, Debug)]
pub enum SsrError {
    #[error("Core error: {0}")]
    Core(#[from] SsrCoreError),

    #[error("Failed to load server bundle from {path}: {reason}")]
    BundleLoad { path: String, reason: String },

    #[error("JavaScript execution error: {0}")]
    JsExecution(String),

    #[error("Script produced no result")]
    NoResult,

    #[error("Script result is not valid JSON: {0}")]
    Deserialization(String),

    #[error("Failed to start SSR worker: {0}")]
    WorkerSpawn(String),

    #[error("Worker channel closed")]
    ChannelClosed,

    #[error("Render timeout after {0}ms")]
    Timeout(u64),

    #[error("Service overloaded, retry after {retry_after_secs}s")]
    Overloaded { retry_after_secs: u32 },
}

pub type Result<T> = std::result::Result<T, SsrError>;

/// Sanitize error messages for client-facing responses.
///
/// Hides internal details while providing useful feedback.
pub fn sanitize_error(error: &SsrError) -> String {
    match error {
        // Safe to expose
        SsrError::Timeout(ms) => format!("Render timed out after {ms}ms"),
        SsrError::ChannelClosed | SsrError::WorkerSpawn(_) => {
            "Service temporarily unavailable".to_string()
        }
        SsrError::Overloaded { retry_after_secs } => {
            format!("Service busy, retry after {retry_after_secs}s")
        }
        // Hide internal details
        SsrError::BundleLoad { .. } => "Internal configuration error".to_string(),
        SsrError::JsExecution(_) => "Render failed".to_string(),
        SsrError::NoResult | SsrError::Deserialization(_) => {
            "Render produced no usable output".to_string()
        }
        SsrError::Core(e) if e.is_validation() => "Invalid request".to_string(),
        SsrError::Core(_) => "Internal configuration error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_hides_internal_details() {
        let error = SsrError::BundleLoad {
            path: "/srv/app/dist/server.js".to_string(),
            reason: "No such file or directory".to_string(),
        };
        let message = sanitize_error(&error);
        assert_eq!(message, "Internal configuration error");
        assert!(!message.contains("/srv"));

        let error = SsrError::JsExecution("ReferenceError: secretFn is not defined".to_string());
        assert_eq!(sanitize_error(&error), "Render failed");
    }

    #[test]
    fn test_sanitize_exposes_retry_hints() {
        assert_eq!(
            sanitize_error(&SsrError::Overloaded {
                retry_after_secs: 3
            }),
            "Service busy, retry after 3s"
        );
        assert_eq!(
            sanitize_error(&SsrError::Timeout(250)),
            "Render timed out after 250ms"
        );
    }

    #[test]
    fn test_core_error_converts() {
        let error: SsrError = SsrCoreError::BlankComponentName.into();
        assert!(matches!(error, SsrError::Core(_)));
        assert_eq!(sanitize_error(&error), "Invalid request");

        let error: SsrError = SsrCoreError::InvalidWorkerCount.into();
        assert_eq!(sanitize_error(&error), "Internal configuration error");
    }
}
