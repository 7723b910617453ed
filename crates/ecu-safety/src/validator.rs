//! Safety Validator
//!
//! Evaluates each live reading against the configured limits and gates
//! tuning writes behind the global safety-mode switch. Validation is a
//! pure function of the current limits and the reading; the monitor only
//! holds the mutable limit configuration and the mode flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use ecu_protocol::LiveReading;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SafetyError;
use crate::limits::{SafetyLimits, SafetyLimitsUpdate};

/// Which limit a reading breached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    RpmLimit,
    BoostLimit,
    CoolantTemp,
}

/// A single limit breach observed on one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAlert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    /// Observed value
    pub value: f64,
    /// Limit in force when the breach was observed
    pub limit: f64,
}

/// Owner of the safety policy for one session
pub struct SafetyMonitor {
    limits: RwLock<SafetyLimits>,
    safety_mode: AtomicBool,
}

impl SafetyMonitor {
    pub fn new(limits: SafetyLimits, safety_mode: bool) -> Self {
        Self {
            limits: RwLock::new(limits),
            safety_mode: AtomicBool::new(safety_mode),
        }
    }

    /// Check a reading against the current limits.
    ///
    /// Each field is evaluated independently with a strict greater-than,
    /// so a reading sitting exactly at a limit raises nothing and one
    /// reading can raise several alerts at once.
    pub fn validate(&self, reading: &LiveReading) -> Vec<SafetyAlert> {
        let limits = self.limits.read().unwrap();
        let mut alerts = Vec::new();

        if let Some(rpm) = reading.rpm {
            if rpm > limits.max_rpm {
                alerts.push(SafetyAlert {
                    kind: AlertKind::RpmLimit,
                    value: rpm,
                    limit: limits.max_rpm,
                });
            }
        }

        if let Some(boost) = reading.boost {
            if boost > limits.max_boost {
                alerts.push(SafetyAlert {
                    kind: AlertKind::BoostLimit,
                    value: boost,
                    limit: limits.max_boost,
                });
            }
        }

        if let Some(coolant_temp) = reading.coolant_temp {
            if coolant_temp > limits.max_coolant_temp {
                alerts.push(SafetyAlert {
                    kind: AlertKind::CoolantTemp,
                    value: coolant_temp,
                    limit: limits.max_coolant_temp,
                });
            }
        }

        alerts
    }

    /// Gate a tuning write on the safety-mode switch.
    ///
    /// Rejected writes never reach the transport.
    pub fn authorize_write(&self) -> Result<(), SafetyError> {
        if self.safety_mode.load(Ordering::SeqCst) {
            warn!("safety mode enabled - parameter write blocked");
            return Err(SafetyError::WriteBlocked);
        }
        Ok(())
    }

    /// Merge a partial update over the current limits, returning the
    /// merged result
    pub fn update_limits(&self, update: &SafetyLimitsUpdate) -> SafetyLimits {
        let mut limits = self.limits.write().unwrap();
        limits.merge(update);
        info!(limits = ?*limits, "safety limits updated");
        limits.clone()
    }

    /// Snapshot of the limits currently in force
    pub fn limits(&self) -> SafetyLimits {
        self.limits.read().unwrap().clone()
    }

    pub fn safety_mode_enabled(&self) -> bool {
        self.safety_mode.load(Ordering::SeqCst)
    }

    pub fn set_safety_mode(&self, enabled: bool) {
        self.safety_mode.store(enabled, Ordering::SeqCst);
        info!(enabled, "safety mode switched");
    }
}
