//! ECU Serial Protocol
//!
//! This crate provides async serial communication with ELM327-style ECU
//! adapters: the transport session, the one-command-at-a-time exchange
//! engine, the parameter codec, and the per-connection bootstrap
//! handshake.

mod codec;
mod engine;
mod error;
mod init;
mod transport;

pub use codec::{
    decode, decode_identity, encode_identity_request, encode_read_request, encode_write_request,
    LiveReading, Parameter,
};
pub use engine::{CommandEngine, DEFAULT_COMMAND_TIMEOUT_MS};
pub use error::EcuError;
pub use init::{initialize, VehicleIdentity};
pub use transport::{ConnectionState, LinkFault, SerialLink, BAUD_RATE};

/// Service mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
    /// Tuning parameter write
    pub const WRITE_PARAMETER: u8 = 0x22;
    /// VIN PID under [`VEHICLE_INFO`]
    pub const PID_VIN: u8 = 0x02;
}

/// ELM-style AT commands used by the bootstrap sequence
pub mod at {
    /// Reset the adapter
    pub const RESET: &str = "ATZ";
    /// Disable command echo
    pub const ECHO_OFF: &str = "ATE0";
    /// Automatic protocol selection
    pub const PROTOCOL_AUTO: &str = "ATSP0";
}
