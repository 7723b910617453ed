//! Session Event Stream

use ecu_protocol::{LiveReading, VehicleIdentity};
use ecu_safety::SafetyAlert;
use serde::Serialize;

/// Messages published to session subscribers, in emission order.
///
/// The serialized form carries the event name in `event` and the
/// payload, when there is one, in `payload`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum EcuEvent {
    /// The transport opened
    Connected,
    /// The session ended, cleanly or not
    Disconnected,
    /// The link failed; always followed by `Disconnected`
    Error { message: String },
    /// Bootstrap completed and identified the vehicle
    Initialized(VehicleIdentity),
    /// One monitoring tick's composite reading
    Data(LiveReading),
    /// Limit breaches observed on the preceding reading
    SafetyAlert(Vec<SafetyAlert>),
    /// A tuning write was applied
    ParameterWritten {
        address: u16,
        value: u16,
        response: String,
    },
}
