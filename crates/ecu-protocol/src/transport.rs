//! Serial Transport Session
//!
//! Owns the physical link to the adapter: opening with fixed framing
//! parameters, splitting into a write half and a background line reader,
//! and propagating link faults to the session layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};
use tracing::{debug, info, warn};

use crate::error::EcuError;

/// Fixed baud rate for ELM327-compatible adapters
pub const BAUD_RATE: u32 = 38_400;

/// Buffered lines between the reader task and the command engine
const LINE_CHANNEL_DEPTH: usize = 32;

/// Connection lifecycle of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A fault that ended the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFault {
    /// The transport reached end-of-stream (adapter unplugged or port closed)
    Closed,
    /// An I/O error occurred on the link
    Io(String),
}

/// An open character-stream link to the adapter.
///
/// The read side runs as a background task that frames incoming bytes
/// into lines and forwards them over a channel; the write side is handed
/// to the command engine. Link faults are published on a watch channel
/// so the owning session can react while no command is in flight.
pub struct SerialLink {
    pub(crate) writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub(crate) lines: mpsc::Receiver<String>,
    pub(crate) connected: Arc<AtomicBool>,
    pub(crate) fault_rx: watch::Receiver<Option<LinkFault>>,
    pub(crate) reader_task: JoinHandle<()>,
}

impl SerialLink {
    /// Open the serial device at `path` with 38400 baud, 8 data bits,
    /// no parity, 1 stop bit.
    pub async fn open(path: &str) -> Result<Self, EcuError> {
        info!(path, baud = BAUD_RATE, "opening ECU serial link");

        let stream = tokio_serial::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| EcuError::Connection(e.to_string()))?;

        Ok(Self::from_stream(stream))
    }

    /// Build a link over an arbitrary byte stream.
    ///
    /// Used for WiFi/TCP adapters and for tests that stand in a
    /// scripted peer for the ECU.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_DEPTH);
        let (fault_tx, fault_rx) = watch::channel(None);
        let connected = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(pump_lines(
            read_half,
            line_tx,
            Arc::clone(&connected),
            fault_tx,
        ));

        Self {
            writer: Box::new(write_half),
            lines: line_rx,
            connected,
            fault_rx,
            reader_task,
        }
    }

    /// Close a link that was never handed to a command engine
    pub fn close(self) {
        self.reader_task.abort();
    }
}

/// Frame incoming bytes into lines and forward them to the engine.
///
/// Exits on end-of-stream, I/O error, or when the engine side is gone;
/// the first two are published as link faults.
async fn pump_lines<R>(
    reader: R,
    line_tx: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
    fault_tx: watch::Sender<Option<LinkFault>>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    let fault = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!(line, "ECU line received");
                if line_tx.send(line.to_string()).await.is_err() {
                    // Engine side dropped; the session is tearing down.
                    connected.store(false, Ordering::SeqCst);
                    return;
                }
            }
            Ok(None) => break LinkFault::Closed,
            Err(e) => break LinkFault::Io(e.to_string()),
        }
    };

    warn!(?fault, "ECU link ended");
    connected.store(false, Ordering::SeqCst);
    let _ = fault_tx.send(Some(fault));
}
