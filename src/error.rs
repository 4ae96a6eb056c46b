//! Error types for the frame-extraction pipeline.
//!
//! All errors implement the `std::error::Error` trait and include structured
//! context for debugging and recovery guidance.
//!
//! ## Error Categories
//!
//! - **Configuration Errors**: Invalid component configuration, rejected
//!   before a driver or extractor is constructed
//! - **Transport Errors**: Open/close/write failures on the underlying driver
//! - **Extraction Errors**: Internal extractor faults (corrupt scan state)
//! - **Pool Errors**: Worker-pool exhaustion or tear-down races
//! - **Timeouts**: Operations that did not complete in their allotted window
//!
//! ## Recovery and Retry
//!
//! Errors provide methods to determine if they are recoverable:
//!
//! ```rust
//! use framewire::FramewireError;
//!
//! let error = FramewireError::transport_failed("port disappeared");
//! if error.is_retryable() {
//!     println!("Can retry this operation");
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! ## Helper Constructors
//!
//! Use helper methods for common error scenarios:
//!
//! ```rust
//! use framewire::FramewireError;
//!
//! // Transport failures
//! let transport_error = FramewireError::transport_failed("connection reset by peer");
//!
//! // Configuration problems
//! let config_error = FramewireError::invalid_config("finish_sequence", "must not be empty");
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T, E = FramewireError> = std::result::Result<T, E>;

/// Main error type for the frame-extraction pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FramewireError {
    #[error("Invalid configuration for '{field}': {reason}")]
    Configuration { field: String, reason: String },

    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Frame extraction fault: {context}")]
    Extraction { context: String },

    #[error("No available workers")]
    PoolExhausted,

    #[error("Worker {worker_id} failed: {reason}")]
    Worker { worker_id: usize, reason: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("{component} has been terminated")]
    Terminated { component: &'static str },
}

impl FramewireError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FramewireError::Transport { .. } => true,
            FramewireError::Timeout { .. } => true,
            FramewireError::Worker { .. } => true,
            FramewireError::Configuration { .. } => false,
            FramewireError::Extraction { .. } => false,
            FramewireError::PoolExhausted => false,
            FramewireError::Terminated { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            FramewireError::Configuration { .. } => vec![
                "Check required configuration fields are populated",
                "Validate delimiter sequences for the selected detection mode",
                "Consult component defaults before overriding",
            ],
            FramewireError::Transport { .. } => vec![
                "Check the device is still attached and powered",
                "Verify port/host settings in the connection configuration",
                "Enable auto-reconnect for unattended operation",
            ],
            FramewireError::Extraction { .. } => vec![
                "Reset the extractor to clear corrupt scan state",
                "Verify delimiter configuration matches the device output",
            ],
            FramewireError::PoolExhausted => vec![
                "Check worker pool was not terminated prematurely",
                "Increase max_workers if sustained load kills workers",
                "Inspect workerError events for the underlying fault",
            ],
            FramewireError::Worker { .. } => vec![
                "Inspect the worker's last error for the root cause",
                "The pool respawns workers automatically; retry the task",
            ],
            FramewireError::Timeout { .. } => vec![
                "Increase timeout duration",
                "Check the device is producing data",
                "Verify system load is not starving worker threads",
            ],
            FramewireError::Terminated { .. } => vec![
                "Construct a new instance; terminated components cannot be reused",
            ],
        }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FramewireError::Configuration { field: field.into(), reason: reason.into() }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        FramewireError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with a source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        FramewireError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for extraction faults.
    pub fn extraction_fault(context: impl Into<String>) -> Self {
        FramewireError::Extraction { context: context.into() }
    }

    /// Helper constructor for worker failures.
    pub fn worker_failed(worker_id: usize, reason: impl Into<String>) -> Self {
        FramewireError::Worker { worker_id, reason: reason.into() }
    }
}

impl From<std::io::Error> for FramewireError {
    fn from(err: std::io::Error) -> Self {
        FramewireError::Transport { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_format_correctly_with_arbitrary_context(
            reason in ".*",
            field in "\\w+",
            worker_id in 0usize..64usize,
            duration_ms in 1u64..60000u64
          ) {
            // Property: Error messages contain their context strings
            let config_error = FramewireError::invalid_config(field.clone(), reason.clone());
            let transport_error = FramewireError::transport_failed(reason.clone());
            let worker_error = FramewireError::worker_failed(worker_id, reason.clone());
            let timeout_error = FramewireError::Timeout { duration: Duration::from_millis(duration_ms) };

            let config_msg = config_error.to_string();
            prop_assert!(config_msg.contains(&field));
            prop_assert!(config_msg.contains(&reason));

            let transport_msg = transport_error.to_string();
            prop_assert!(transport_msg.contains(&reason));

            let worker_msg = worker_error.to_string();
            prop_assert!(worker_msg.contains(&worker_id.to_string()));

            // Property: No error message should be empty
            prop_assert!(!config_msg.is_empty());
            prop_assert!(!transport_msg.is_empty());
            prop_assert!(!worker_msg.is_empty());
            prop_assert!(!timeout_error.to_string().is_empty());
          }

          #[test]
          fn error_source_chaining_preserves_information(
            base_message in "[a-z ]{1,40}",
            outer_reason in "[a-z ]{1,40}"
          ) {
            // Property: The io::Error source survives wrapping and is reachable
            let io_err = std::io::Error::other(base_message.clone());
            let wrapped = FramewireError::transport_failed_with_source(
              outer_reason.clone(),
              Box::new(io_err),
            );

            let source = std::error::Error::source(&wrapped);
            prop_assert!(source.is_some());
            prop_assert!(source.unwrap().to_string().contains(&base_message));
            prop_assert!(wrapped.to_string().contains(&outer_reason));
          }

          #[test]
          fn retryability_is_stable_per_variant(reason in ".*") {
            // Property: classification depends on the variant, not the payload
            prop_assert!(FramewireError::transport_failed(reason.clone()).is_retryable());
            prop_assert!(!FramewireError::invalid_config("f", reason.clone()).is_retryable());
            prop_assert!(!FramewireError::extraction_fault(reason).is_retryable());
            prop_assert!(!FramewireError::PoolExhausted.is_retryable());
          }
        }
    }

    #[test]
    fn error_constructors_validation() {
        let config_error = FramewireError::invalid_config("port", "must not be empty");
        assert!(matches!(config_error, FramewireError::Configuration { .. }));

        let transport_error = FramewireError::transport_failed("test");
        assert!(matches!(transport_error, FramewireError::Transport { .. }));

        let extraction_error = FramewireError::extraction_fault("scan state corrupt");
        assert!(matches!(extraction_error, FramewireError::Extraction { .. }));
    }

    #[test]
    fn error_traits_validation() {
        // Compile-time check: FramewireError must be Send + Sync + 'static
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<FramewireError>();

        let error = FramewireError::PoolExhausted;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_methods_work() {
        let transport_error = FramewireError::transport_failed("test");
        let config_error = FramewireError::invalid_config("baud", "zero");
        let terminated_error = FramewireError::Terminated { component: "WorkerPool" };

        assert!(transport_error.is_retryable());
        assert!(!config_error.is_retryable());
        assert!(!terminated_error.is_retryable());

        for suggestion in transport_error.recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
        assert!(!config_error.recovery_suggestions().is_empty());
    }

    #[test]
    fn from_io_error_preserves_message() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: FramewireError = io_err.into();

        match err {
            FramewireError::Transport { reason, source } => {
                assert_eq!(reason, "pipe closed");
                assert!(source.is_some());
            }
            _ => panic!("Expected Transport error variant"),
        }
    }
}
