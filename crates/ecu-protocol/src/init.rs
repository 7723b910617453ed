//! Session Bootstrap
//!
//! One-time initialization sequence run immediately after the transport
//! opens: reset the adapter, disable echo, select the protocol
//! automatically, and read the vehicle identity.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::info;

use crate::at;
use crate::codec;
use crate::engine::CommandEngine;
use crate::error::EcuError;

/// Settle time after `ATZ`; the adapter reboots and drops characters
/// sent sooner.
const RESET_SETTLE: Duration = Duration::from_millis(1000);

/// Identity of the connected vehicle, read once per session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleIdentity {
    pub vin: String,
}

/// Run the bootstrap handshake over a freshly opened link.
///
/// Any failing step aborts the sequence; the caller tears the link down
/// and a reconnect starts over from the reset.
pub async fn initialize(engine: &CommandEngine) -> Result<VehicleIdentity, EcuError> {
    info!("initializing ECU link");

    engine.send_command(at::RESET).await?;
    time::sleep(RESET_SETTLE).await;

    engine.send_command(at::ECHO_OFF).await?;
    engine.send_command(at::PROTOCOL_AUTO).await?;

    let raw = engine.send_command(&codec::encode_identity_request()).await?;
    let vin = codec::decode_identity(&raw)?;

    let identity = VehicleIdentity { vin };
    info!(vin = %identity.vin, "vehicle identified");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SerialLink;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Scripted adapter peer answering the bootstrap sequence.
    async fn run_mock_adapter(stream: tokio::io::DuplexStream) {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader.read_until(b'\r', &mut buf).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            let command = String::from_utf8_lossy(&buf);
            let command = command.trim_end_matches('\r').trim();
            let reply = match command {
                "ATZ" => "ELM327 v1.5",
                "ATE0" => "OK",
                "ATSP0" => "OK",
                "0902" => "49 02 01 31 44 34 47 50 30 30 52 35 35 42 31 32 33 34 35 36",
                _ => "?",
            };
            write_half
                .write_all(format!("{reply}\r\n").as_bytes())
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_reads_vehicle_identity() {
        let (near, far) = tokio::io::duplex(256);
        tokio::spawn(run_mock_adapter(far));

        let engine = CommandEngine::new(
            SerialLink::from_stream(near),
            Duration::from_millis(5000),
        );

        let identity = initialize(&engine).await.unwrap();
        assert_eq!(identity.vin, "4GP00R55B123456");
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_fails_on_unreadable_identity() {
        let (near, far) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(far);
            let mut reader = BufReader::new(read_half);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                if reader.read_until(b'\r', &mut buf).await.unwrap_or(0) == 0 {
                    return;
                }
                // Too short to carry a VIN, whatever was asked.
                write_half.write_all(b"49\r\n").await.unwrap();
            }
        });

        let engine = CommandEngine::new(
            SerialLink::from_stream(near),
            Duration::from_millis(5000),
        );

        assert!(matches!(
            initialize(&engine).await,
            Err(EcuError::Decode(_))
        ));
    }
}
