//! Command-Response Engine
//!
//! Serializes exchanges with the ECU: one command in flight at a time,
//! carriage-return terminated writes, and a per-command response deadline.
//! The engine is the synchronization point between the monitoring sweep
//! and manually triggered tuning writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use crate::error::EcuError;
use crate::transport::{LinkFault, SerialLink};

/// Default per-command response deadline
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// The exclusive I/O pair for one exchange.
///
/// Holding the lock on this pair *is* the pending-command slot: a caller
/// that cannot acquire it immediately is rejected with [`EcuError::Busy`]
/// rather than queued.
struct Exchange {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    lines: mpsc::Receiver<String>,
}

/// Command engine over an open [`SerialLink`]
pub struct CommandEngine {
    exchange: Mutex<Exchange>,
    connected: Arc<AtomicBool>,
    fault_rx: watch::Receiver<Option<LinkFault>>,
    reader_task: JoinHandle<()>,
    timeout: Duration,
}

impl CommandEngine {
    /// Take ownership of an open link, applying `timeout` to every exchange
    pub fn new(link: SerialLink, timeout: Duration) -> Self {
        Self {
            exchange: Mutex::new(Exchange {
                writer: link.writer,
                lines: link.lines,
            }),
            connected: link.connected,
            fault_rx: link.fault_rx,
            reader_task: link.reader_task,
            timeout,
        }
    }

    /// Send one command and wait for the next complete response line.
    ///
    /// Fails fast with [`EcuError::NotConnected`] when the link is down
    /// and [`EcuError::Busy`] when another exchange holds the slot. On
    /// timeout the slot is released; a response that arrives after its
    /// deadline is discarded at the start of the next exchange instead
    /// of being mismatched to it.
    pub async fn send_command(&self, command: &str) -> Result<String, EcuError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(EcuError::NotConnected);
        }

        let mut exchange = self.exchange.try_lock().map_err(|_| EcuError::Busy)?;

        // Drop anything left over from a timed-out exchange.
        while exchange.lines.try_recv().is_ok() {}

        debug!(command, "sending ECU command");
        exchange.writer.write_all(command.as_bytes()).await?;
        exchange.writer.write_all(b"\r").await?;
        exchange.writer.flush().await?;

        match time::timeout(self.timeout, exchange.lines.recv()).await {
            Ok(Some(response)) => {
                debug!(response, "ECU response");
                Ok(response)
            }
            // The reader task is gone: the link died under us.
            Ok(None) => Err(EcuError::NotConnected),
            Err(_) => Err(EcuError::CommandTimeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Whether the underlying link is still up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Watch for the fault that ends the link, if any
    pub fn fault_events(&self) -> watch::Receiver<Option<LinkFault>> {
        self.fault_rx.clone()
    }

    /// Tear the link down: stops the reader task and fails any pending
    /// exchange promptly instead of leaving it to run out its deadline.
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader_task.abort();
    }
}

impl Drop for CommandEngine {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
