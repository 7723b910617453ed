//! Monitoring Loop Implementation

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ecu_protocol::{decode, encode_read_request, CommandEngine, LiveReading, Parameter};
use ecu_safety::{SafetyAlert, SafetyMonitor};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default polling cadence (10 Hz)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Configuration for the monitoring loop
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between polling sweeps
    pub tick_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
        }
    }
}

/// Output of one monitoring tick, in emission order
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// The tick's composite reading, validated or not
    Reading(LiveReading),
    /// Limit breaches observed on the reading that preceded this event
    Alerts(Vec<SafetyAlert>),
}

/// Periodic polling loop over a shared command engine
pub struct Monitor {
    engine: Arc<CommandEngine>,
    safety: Arc<SafetyMonitor>,
    config: MonitorConfig,
}

/// Control handle for a started monitoring loop
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop to stop after the current sweep; idempotent
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop the loop and wait for it to wind down
    pub async fn join(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Monitor {
    pub fn new(engine: Arc<CommandEngine>, safety: Arc<SafetyMonitor>, config: MonitorConfig) -> Self {
        Self {
            engine,
            safety,
            config,
        }
    }

    /// Start ticking, emitting readings and alerts on `events`.
    ///
    /// Each tick sweeps the full parameter set sequentially through the
    /// engine, validates the assembled reading, and emits it. Ticks never
    /// overlap: a sweep that outruns the interval delays the next tick
    /// until a full period after it completes, trading sampling rate for
    /// bounded transport load.
    pub fn start(self, events: mpsc::Sender<MonitorEvent>) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_ms = self.config.tick_interval.as_millis() as u64,
                "monitoring started"
            );

            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let reading = sweep(&self.engine).await;
                        let alerts = self.safety.validate(&reading);

                        if events.send(MonitorEvent::Reading(reading)).await.is_err() {
                            // Consumer is gone; no point polling further.
                            break;
                        }
                        if !alerts.is_empty() {
                            warn!(count = alerts.len(), "safety limits breached");
                            if events.send(MonitorEvent::Alerts(alerts)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }

            info!("monitoring stopped");
        });

        MonitorHandle { stop_tx, task }
    }
}

/// Poll every parameter once and assemble the tick's reading.
///
/// A parameter whose request or decode fails is logged and omitted; the
/// sweep itself never fails.
async fn sweep(engine: &CommandEngine) -> LiveReading {
    let mut reading = LiveReading::new(Utc::now());

    for parameter in Parameter::ALL {
        let command = encode_read_request(parameter);
        match engine.send_command(&command).await {
            Ok(raw) => match decode(parameter, &raw) {
                Ok(value) => reading.set(parameter, value),
                Err(err) => {
                    warn!(parameter = parameter.name(), %err, "dropping undecodable parameter")
                }
            },
            Err(err) => warn!(parameter = parameter.name(), %err, "parameter read failed"),
        }
    }

    debug!(decoded = reading.decoded_count(), "sweep complete");
    reading
}
