//! Device twin documents and direct-method replies.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Desired properties as written by operators or cloud-side automation.
///
/// Unknown keys (including service metadata such as `$version`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredProperties {
    /// Target production rate in percent. Validated by the agent.
    #[serde(
        rename = "ProductionRate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub production_rate: Option<Number>,

    #[serde(
        rename = "telemetryConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub telemetry_config: Option<TelemetryConfig>,
}

impl DesiredProperties {
    /// The raw `telemetryConfig.sendFrequency` string, if present.
    pub fn send_frequency(&self) -> Option<&str> {
        self.telemetry_config
            .as_ref()
            .and_then(|c| c.send_frequency.as_deref())
    }

    /// Whether the document carries nothing the agent acts on.
    pub fn is_empty(&self) -> bool {
        self.production_rate.is_none() && self.send_frequency().is_none()
    }
}

/// Nested telemetry settings inside the desired document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Interval such as `"30s"`, `"5m"` or `"2h"`.
    #[serde(
        rename = "sendFrequency",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub send_frequency: Option<String>,
}

/// Reported properties written back by the agent.
///
/// Only fields that are `Some` are sent, so each update is a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedProperties {
    #[serde(
        rename = "DeviceErrors",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub device_errors: Option<u32>,

    #[serde(
        rename = "ProductionRate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub production_rate: Option<u8>,
}

impl ReportedProperties {
    pub fn device_errors(errors: u32) -> Self {
        Self {
            device_errors: Some(errors),
            ..Default::default()
        }
    }

    pub fn production_rate(rate: u8) -> Self {
        Self {
            production_rate: Some(rate),
            ..Default::default()
        }
    }

    /// Overlay the fields set in `patch`.
    pub fn merge(&mut self, patch: &ReportedProperties) {
        if patch.device_errors.is_some() {
            self.device_errors = patch.device_errors;
        }
        if patch.production_rate.is_some() {
            self.production_rate = patch.production_rate;
        }
    }
}

/// Full twin as returned by a `GetConfig` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinDocument {
    #[serde(default)]
    pub desired: DesiredProperties,
    #[serde(default)]
    pub reported: ReportedProperties,
}

/// Reply body for a direct method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodReply {
    pub status: u16,
    pub payload: Value,
}

impl MethodReply {
    pub const OK: u16 = 200;
    pub const NOT_FOUND: u16 = 404;
    pub const FAILED: u16 = 500;

    /// Successful invocation with a descriptive message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Self::OK,
            payload: serde_json::json!({ "message": message.into() }),
        }
    }

    /// Failed invocation carrying the error text.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: Self::FAILED,
            payload: serde_json::json!({ "error": error.into() }),
        }
    }

    /// Reply for a method name the device does not implement.
    pub fn not_found(method: &str) -> Self {
        Self {
            status: Self::NOT_FOUND,
            payload: serde_json::json!({ "error": format!("Unknown method '{}'", method) }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::OK
    }
}
