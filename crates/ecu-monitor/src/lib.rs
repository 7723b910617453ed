//! ECU Monitoring Loop
//!
//! Drives fixed-cadence polling of the live parameter set through the
//! command engine, validates each composite reading, and emits readings
//! and alerts in tick order.

mod monitor;

pub use monitor::{
    Monitor, MonitorConfig, MonitorEvent, MonitorHandle, DEFAULT_TICK_INTERVAL_MS,
};
