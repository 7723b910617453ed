//! Session Configuration

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Runtime configuration for one ECU session.
///
/// Sourced from built-in defaults overlaid with `ECU_*` environment
/// variables: `ECU_PORT`, `ECU_COMMAND_TIMEOUT_MS`,
/// `ECU_TICK_INTERVAL_MS`, `ECU_SAFETY_MODE`.
#[derive(Debug, Clone, Deserialize)]
pub struct EcuConfig {
    /// Serial device path of the adapter
    pub port: String,
    /// Per-command response deadline in milliseconds
    pub command_timeout_ms: u64,
    /// Monitoring cadence in milliseconds
    pub tick_interval_ms: u64,
    /// When enabled, every tuning write is rejected
    pub safety_mode: bool,
}

impl Default for EcuConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            command_timeout_ms: ecu_protocol::DEFAULT_COMMAND_TIMEOUT_MS,
            tick_interval_ms: ecu_monitor::DEFAULT_TICK_INTERVAL_MS,
            safety_mode: false,
        }
    }
}

impl EcuConfig {
    /// Load configuration from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("port", DEFAULT_PORT)?
            .set_default(
                "command_timeout_ms",
                ecu_protocol::DEFAULT_COMMAND_TIMEOUT_MS as i64,
            )?
            .set_default(
                "tick_interval_ms",
                ecu_monitor::DEFAULT_TICK_INTERVAL_MS as i64,
            )?
            .set_default("safety_mode", false)?
            .add_source(Environment::with_prefix("ECU"))
            .build()?
            .try_deserialize()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = EcuConfig::default();
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.command_timeout_ms, 5000);
        assert_eq!(config.tick_interval_ms, 100);
        assert!(!config.safety_mode);
    }

    #[test]
    fn environment_overrides_defaults() {
        std::env::set_var("ECU_PORT", "/dev/ttyACM1");
        std::env::set_var("ECU_COMMAND_TIMEOUT_MS", "2500");
        std::env::set_var("ECU_SAFETY_MODE", "true");

        let config = EcuConfig::from_env().unwrap();
        assert_eq!(config.port, "/dev/ttyACM1");
        assert_eq!(config.command_timeout_ms, 2500);
        assert_eq!(config.tick_interval_ms, 100);
        assert!(config.safety_mode);

        std::env::remove_var("ECU_PORT");
        std::env::remove_var("ECU_COMMAND_TIMEOUT_MS");
        std::env::remove_var("ECU_SAFETY_MODE");
    }
}
