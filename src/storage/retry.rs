//! Transaction retry configuration and error classification.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::contracts::{FrontdeskError, SequenceError, StorageError};

/// Configuration for retrying transactions that lose a row-lock race.
///
/// Pessimistic transactions time out instead of deadlocking when two
/// workflows contend for the same counter row for too long; retrying with
/// backoff resolves the loser without surfacing an error to the caller.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 10,
            max_delay_ms: 1_000,
        }
    }
}

impl RetryConfig {
    /// Creates a RetryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `FRONTDESK_TXN_MAX_RETRIES`: Maximum retry attempts (default: 5)
    /// - `FRONTDESK_TXN_RETRY_INITIAL_MS`: Initial backoff delay in ms (default: 10)
    /// - `FRONTDESK_TXN_RETRY_MAX_MS`: Maximum backoff delay in ms (default: 1000)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_retries: std::env::var("FRONTDESK_TXN_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_retries),
            initial_delay_ms: std::env::var("FRONTDESK_TXN_RETRY_INITIAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.initial_delay_ms),
            max_delay_ms: std::env::var("FRONTDESK_TXN_RETRY_MAX_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_delay_ms),
        }
    }

    /// Creates an exponential backoff builder with jitter.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

/// Classifies an error as a retryable lock conflict.
///
/// Only storage-level lock conflicts qualify; validation errors, uniqueness
/// conflicts, and sequence overflows are deterministic and retrying them
/// would just repeat the failure.
pub fn is_lock_conflict(err: &FrontdeskError) -> bool {
    matches!(
        err,
        FrontdeskError::Storage(StorageError::LockConflict(_))
            | FrontdeskError::Sequence(SequenceError::Storage(StorageError::LockConflict(_)))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_delay_ms, 10);
        assert_eq!(config.max_delay_ms, 1_000);
    }

    #[test]
    fn lock_conflicts_are_retryable() {
        let err = FrontdeskError::Storage(StorageError::LockConflict("timed out".into()));
        assert!(is_lock_conflict(&err));

        let nested = FrontdeskError::Sequence(SequenceError::Storage(
            StorageError::LockConflict("busy".into()),
        ));
        assert!(is_lock_conflict(&nested));
    }

    #[test]
    fn deterministic_failures_are_not_retryable() {
        assert!(!is_lock_conflict(&FrontdeskError::Validation(
            "fullName is required".into()
        )));
        assert!(!is_lock_conflict(&FrontdeskError::Storage(
            StorageError::AlreadyExists {
                entity: "registration",
                code: "251212000001".into(),
            }
        )));
        assert!(!is_lock_conflict(&FrontdeskError::Sequence(
            SequenceError::Overflow {
                seq_type: "RM",
                counter: 1000,
                width: 3,
            }
        )));
    }

    #[test]
    fn from_env_with_custom_values() {
        std::env::set_var("FRONTDESK_TXN_MAX_RETRIES", "3");
        std::env::set_var("FRONTDESK_TXN_RETRY_INITIAL_MS", "20");
        std::env::set_var("FRONTDESK_TXN_RETRY_MAX_MS", "500");

        let config = RetryConfig::from_env();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 20);
        assert_eq!(config.max_delay_ms, 500);

        std::env::remove_var("FRONTDESK_TXN_MAX_RETRIES");
        std::env::remove_var("FRONTDESK_TXN_RETRY_INITIAL_MS");
        std::env::remove_var("FRONTDESK_TXN_RETRY_MAX_MS");
    }
}
