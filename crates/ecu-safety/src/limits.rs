//! Safety Limit Configuration

use serde::{Deserialize, Serialize};

/// Hard safety thresholds applied to every live reading.
///
/// Every field is always present; a partial update backfills omitted
/// fields with their current values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyLimits {
    /// Maximum engine speed (RPM)
    #[serde(rename = "maxRPM")]
    pub max_rpm: f64,
    /// Maximum manifold boost (PSI)
    pub max_boost: f64,
    /// Maximum exhaust gas temperature (°F)
    #[serde(rename = "maxEGT")]
    pub max_egt: f64,
    /// Maximum coolant temperature (°F)
    pub max_coolant_temp: f64,
    /// Minimum oil pressure (PSI)
    pub min_oil_pressure: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_rpm: 7000.0,
            max_boost: 25.0,
            max_egt: 1600.0,
            max_coolant_temp: 220.0,
            min_oil_pressure: 10.0,
        }
    }
}

/// Partial limits update from an operator action.
///
/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyLimitsUpdate {
    #[serde(rename = "maxRPM")]
    pub max_rpm: Option<f64>,
    pub max_boost: Option<f64>,
    #[serde(rename = "maxEGT")]
    pub max_egt: Option<f64>,
    pub max_coolant_temp: Option<f64>,
    pub min_oil_pressure: Option<f64>,
}

impl SafetyLimits {
    /// Merge an update over the current limits
    pub fn merge(&mut self, update: &SafetyLimitsUpdate) {
        if let Some(max_rpm) = update.max_rpm {
            self.max_rpm = max_rpm;
        }
        if let Some(max_boost) = update.max_boost {
            self.max_boost = max_boost;
        }
        if let Some(max_egt) = update.max_egt {
            self.max_egt = max_egt;
        }
        if let Some(max_coolant_temp) = update.max_coolant_temp {
            self.max_coolant_temp = max_coolant_temp;
        }
        if let Some(min_oil_pressure) = update.min_oil_pressure {
            self.min_oil_pressure = min_oil_pressure;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_merge_leaves_other_fields_untouched() {
        let mut limits = SafetyLimits::default();
        limits.merge(&SafetyLimitsUpdate {
            max_rpm: Some(6500.0),
            ..Default::default()
        });

        assert_eq!(limits.max_rpm, 6500.0);
        assert_eq!(limits.max_boost, 25.0);
        assert_eq!(limits.max_egt, 1600.0);
        assert_eq!(limits.max_coolant_temp, 220.0);
        assert_eq!(limits.min_oil_pressure, 10.0);
    }

    #[test]
    fn full_merge_replaces_everything() {
        let mut limits = SafetyLimits::default();
        limits.merge(&SafetyLimitsUpdate {
            max_rpm: Some(8200.0),
            max_boost: Some(32.0),
            max_egt: Some(1700.0),
            max_coolant_temp: Some(230.0),
            min_oil_pressure: Some(12.0),
        });

        assert_eq!(
            limits,
            SafetyLimits {
                max_rpm: 8200.0,
                max_boost: 32.0,
                max_egt: 1700.0,
                max_coolant_temp: 230.0,
                min_oil_pressure: 12.0,
            }
        );
    }

    #[test]
    fn update_deserializes_from_operator_json() {
        let update: SafetyLimitsUpdate =
            serde_json::from_str(r#"{"maxRPM": 6500}"#).unwrap();
        assert_eq!(update.max_rpm, Some(6500.0));
        assert_eq!(update.max_boost, None);
    }
}
