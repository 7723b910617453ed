//! ECU Protocol Error Types

use thiserror::Error;

/// Errors that can occur during ECU communication
#[derive(Debug, Error)]
pub enum EcuError {
    /// Serial link could not be opened
    #[error("failed to open ECU link: {0}")]
    Connection(String),

    /// Operation attempted while disconnected
    #[error("ECU not connected")]
    NotConnected,

    /// A command is already in flight
    #[error("ECU command already in flight")]
    Busy,

    /// No response within the command deadline
    #[error("no ECU response within {0}ms")]
    CommandTimeout(u64),

    /// Malformed or short response
    #[error("malformed ECU response: {0}")]
    Decode(String),

    /// I/O failure on an open link
    #[error("serial I/O error: {0}")]
    Serial(String),
}

impl From<std::io::Error> for EcuError {
    fn from(err: std::io::Error) -> Self {
        EcuError::Serial(err.to_string())
    }
}
