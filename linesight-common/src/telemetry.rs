//! Device-to-cloud payload schemas.
//!
//! Field names are PascalCase on the wire because that is what the
//! cloud-side stream jobs and functions already consume.

use serde::{Deserialize, Serialize};

/// Periodic production telemetry for one device.
///
/// `GoodCount`/`BadCount` are per-interval deltas; the `Total*` fields carry
/// the cumulative counters the deltas were derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TelemetryMessage {
    pub production_status: i32,
    pub workorder_id: String,
    pub good_count: i64,
    pub bad_count: i64,
    pub total_good_count: i64,
    pub total_bad_count: i64,
    pub temperature: f64,
}

/// Event discriminator carried by alert payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEvent {
    Error,
}

/// Alert emitted whenever a device's error flags change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorAlert {
    /// Raw error bitmask.
    pub errors: u32,
    /// Protocol node the device is addressed by.
    pub device_node: String,
    pub event: AlertEvent,
    /// `"true"` when the bitmask grew since the previous notification.
    #[serde(with = "bool_string")]
    pub errors_increased: bool,
}

impl ErrorAlert {
    /// Build an error alert.
    pub fn new(errors: u32, device_node: impl Into<String>, errors_increased: bool) -> Self {
        Self {
            errors,
            device_node: device_node.into(),
            event: AlertEvent::Error,
            errors_increased,
        }
    }
}

/// Booleans travel as `"true"`/`"false"` strings in alert payloads.
mod bool_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match String::deserialize(deserializer)?.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(D::Error::custom(format!(
                "expected \"true\" or \"false\", got {:?}",
                other
            ))),
        }
    }
}
