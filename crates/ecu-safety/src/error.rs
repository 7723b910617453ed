//! Safety Error Types

use thiserror::Error;

/// Errors raised by the safety policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyError {
    /// Safety mode gates all tuning writes
    #[error("safety mode prevents parameter modification")]
    WriteBlocked,
}
