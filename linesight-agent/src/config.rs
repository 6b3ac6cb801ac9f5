//! Configuration for the agent.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use linesight_bridge_framework::{BridgeConfig, BridgeError, Format, LoggingConfig, ZenohConfig};

use crate::device::{DeviceSettings, RateControl};
use crate::rate::{DEFAULT_STEP, DEFAULT_THRESHOLD, RatePolicy};
use crate::tags::Tag;
use crate::twin::{DEFAULT_SEND_FREQUENCY_SECS, interval_from_secs, valid_interval};

/// Complete agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Encoding of telemetry and alert events
    #[serde(default)]
    pub serialization: Format,

    /// Agent-specific settings
    pub agent: AgentSection,
}

/// Agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Key expression prefix (default: "linesight/opcua")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// How the production lines are reached
    pub protocol: ProtocolConfig,

    /// Register layout for the Modbus adapter
    #[serde(default)]
    pub tag_map: TagMap,

    /// Production lines to admit
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub rate_control: RateControlConfig,

    #[serde(default)]
    pub connection: ConnectionSettings,

    /// How long to wait for the twin at startup
    #[serde(default = "default_twin_timeout_ms")]
    pub twin_timeout_ms: u64,
}

fn default_key_prefix() -> String {
    linesight_common::KEY_PREFIX.to_string()
}

fn default_twin_timeout_ms() -> u64 {
    5000
}

/// Protocol endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolConfig {
    /// Modbus TCP
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial)
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// "none", "even" or "odd"
        #[serde(default = "default_parity")]
        parity: String,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
    /// In-memory production lines (demo mode)
    Simulated {
        /// Production cycle of each simulated line
        #[serde(default = "default_production_period_ms")]
        production_period_ms: u64,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_production_period_ms() -> u64 {
    1000
}

/// One production line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (used in key expressions)
    pub name: String,

    /// Protocol node the tags live under, e.g. "ns=2;s=Device 1"
    pub node_id: String,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
}

fn default_unit_id() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Send interval used until the twin provides one
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: f64,
}

fn default_interval_secs() -> f64 {
    DEFAULT_SEND_FREQUENCY_SECS
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            default_interval_secs: default_interval_secs(),
        }
    }
}

/// Quality throttle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateControlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Percentage points removed per throttle decision
    #[serde(default = "default_step")]
    pub step: u8,

    /// Good ratio (percent) below which the rate is lowered
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Length of the production window the ratio is computed over
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_step() -> u8 {
    DEFAULT_STEP
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_window_secs() -> u64 {
    300
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step: default_step(),
            threshold: default_threshold(),
            window_secs: default_window_secs(),
        }
    }
}

/// Protocol connection behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Per-request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between reconnect attempts
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    /// Poll period used to emulate tag subscriptions
    #[serde(default = "default_subscription_poll_ms")]
    pub subscription_poll_ms: u64,
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_secs() -> u64 {
    5
}

fn default_subscription_poll_ms() -> u64 {
    500
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            reconnect_secs: default_reconnect_secs(),
            subscription_poll_ms: default_subscription_poll_ms(),
        }
    }
}

impl ConnectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    pub fn subscription_poll(&self) -> Duration {
        Duration::from_millis(self.subscription_poll_ms)
    }
}

/// Data type interpretation for 16-bit registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Unsigned 16-bit integer (default)
    #[default]
    U16,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 32-bit integer (2 registers, big-endian)
    U32,
    /// Signed 32-bit integer (2 registers, big-endian)
    I32,
    /// 32-bit float (2 registers, big-endian)
    F32,
    /// Unsigned 32-bit integer (2 registers, little-endian word order)
    U32Le,
    /// 32-bit float (2 registers, little-endian word order)
    F32Le,
    /// ASCII text, two characters per register
    Ascii,
}

impl DataType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::U16 | DataType::I16 | DataType::U32 | DataType::I32 | DataType::U32Le
        )
    }
}

/// Where a tag lives in the holding register table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterMapping {
    /// Starting address (0-based)
    pub address: u16,

    #[serde(default)]
    pub data_type: DataType,

    /// Register count, only used by `ascii`
    #[serde(default = "default_count")]
    pub count: u16,

    /// Scaling factor (value * scale)
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Offset (value * scale + offset)
    #[serde(default)]
    pub offset: f64,
}

fn default_count() -> u16 {
    1
}

fn default_scale() -> f64 {
    1.0
}

impl RegisterMapping {
    pub fn new(address: u16, data_type: DataType) -> Self {
        Self {
            address,
            data_type,
            count: 1,
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub fn ascii(address: u16, count: u16) -> Self {
        Self {
            count,
            ..Self::new(address, DataType::Ascii)
        }
    }

    /// Number of 16-bit registers the value occupies.
    pub fn registers_needed(&self) -> u16 {
        match self.data_type {
            DataType::U16 | DataType::I16 => 1,
            DataType::U32 | DataType::I32 | DataType::F32 | DataType::U32Le | DataType::F32Le => 2,
            DataType::Ascii => self.count,
        }
    }

    pub fn is_scaled(&self) -> bool {
        self.scale != 1.0 || self.offset != 0.0
    }
}

/// Coils pulsed to invoke device methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MethodCoils {
    pub emergency_stop: u16,
    pub reset_error_status: u16,
}

impl Default for MethodCoils {
    fn default() -> Self {
        Self {
            emergency_stop: 0,
            reset_error_status: 1,
        }
    }
}

/// Register layout of one production line, keyed by tag name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TagMap {
    pub production_status: RegisterMapping,
    pub production_rate: RegisterMapping,
    pub workorder_id: RegisterMapping,
    pub temperature: RegisterMapping,
    pub good_count: RegisterMapping,
    pub bad_count: RegisterMapping,
    pub device_error: RegisterMapping,
    pub methods: MethodCoils,
}

impl Default for TagMap {
    fn default() -> Self {
        Self {
            production_status: RegisterMapping::new(0, DataType::U16),
            production_rate: RegisterMapping::new(1, DataType::U16),
            temperature: RegisterMapping::new(2, DataType::F32),
            good_count: RegisterMapping::new(4, DataType::U32),
            bad_count: RegisterMapping::new(6, DataType::U32),
            device_error: RegisterMapping::new(8, DataType::U16),
            workorder_id: RegisterMapping::ascii(10, 18),
            methods: MethodCoils::default(),
        }
    }
}

impl TagMap {
    pub fn mapping(&self, tag: Tag) -> &RegisterMapping {
        match tag {
            Tag::ProductionStatus => &self.production_status,
            Tag::ProductionRate => &self.production_rate,
            Tag::WorkorderId => &self.workorder_id,
            Tag::Temperature => &self.temperature,
            Tag::GoodCount => &self.good_count,
            Tag::BadCount => &self.bad_count,
            Tag::DeviceError => &self.device_error,
        }
    }

    fn validate(&self) -> Result<(), String> {
        for tag in Tag::ALL {
            let mapping = self.mapping(tag);
            if mapping.registers_needed() == 0 {
                return Err(format!("tag_map.{}: count must be at least 1", tag));
            }
            if u32::from(mapping.address) + u32::from(mapping.registers_needed()) > 0x1_0000 {
                return Err(format!("tag_map.{}: register range exceeds 65535", tag));
            }
            let textual = tag == Tag::WorkorderId;
            if textual != (mapping.data_type == DataType::Ascii) {
                return Err(format!(
                    "tag_map.{}: data_type {:?} does not fit the tag",
                    tag, mapping.data_type
                ));
            }
        }
        Ok(())
    }
}

impl AgentConfig {
    /// Device settings derived from the shared sections.
    pub fn device_settings(&self, device: &DeviceConfig) -> DeviceSettings {
        let rc = &self.agent.rate_control;
        DeviceSettings {
            name: device.name.clone(),
            node_id: device.node_id.clone(),
            format: self.serialization,
            default_interval: interval_from_secs(self.agent.telemetry.default_interval_secs)
                .unwrap_or(Duration::from_secs(DEFAULT_SEND_FREQUENCY_SECS as u64)),
            rate_control: rc.enabled.then(|| RateControl {
                policy: RatePolicy {
                    step: rc.step,
                    threshold: rc.threshold,
                },
                window: Duration::from_secs(rc.window_secs),
            }),
        }
    }

    pub fn twin_timeout(&self) -> Duration {
        Duration::from_millis(self.agent.twin_timeout_ms)
    }

    /// Validate the agent section.
    pub fn validate_agent(&self) -> Result<(), String> {
        let agent = &self.agent;

        if agent.devices.is_empty() {
            return Err("At least one device must be configured".to_string());
        }

        let mut names = HashSet::new();
        let mut nodes = HashSet::new();
        for device in &agent.devices {
            if device.name.is_empty() {
                return Err("Device name cannot be empty".to_string());
            }
            if device.name.contains(['/', '*', '$', '?', '#']) {
                return Err(format!(
                    "Device '{}': name must be a single key expression chunk",
                    device.name
                ));
            }
            if device.node_id.is_empty() {
                return Err(format!("Device '{}': node_id cannot be empty", device.name));
            }
            if !names.insert(device.name.as_str()) {
                return Err(format!("Duplicate device name '{}'", device.name));
            }
            if !nodes.insert(device.node_id.as_str()) {
                return Err(format!("Duplicate node_id '{}'", device.node_id));
            }
            if !matches!(agent.protocol, ProtocolConfig::Simulated { .. })
                && !(1..=247).contains(&device.unit_id)
            {
                return Err(format!("Device '{}': unit_id must be 1-247", device.name));
            }
        }

        if !valid_interval(agent.telemetry.default_interval_secs) {
            return Err(format!(
                "telemetry.default_interval_secs must be greater than 2 and finite (got {})",
                agent.telemetry.default_interval_secs
            ));
        }

        let rc = &agent.rate_control;
        if !(1..=100).contains(&rc.step) {
            return Err(format!("rate_control.step must be 1-100 (got {})", rc.step));
        }
        if !(rc.threshold > 0.0 && rc.threshold <= 100.0) {
            return Err(format!(
                "rate_control.threshold must be in (0, 100] (got {})",
                rc.threshold
            ));
        }
        if rc.window_secs == 0 {
            return Err("rate_control.window_secs must be positive".to_string());
        }

        let conn = &agent.connection;
        if conn.timeout_ms == 0 || conn.subscription_poll_ms == 0 || conn.reconnect_secs == 0 {
            return Err("connection timings must be positive".to_string());
        }

        match &agent.protocol {
            ProtocolConfig::Rtu { parity, .. } => match parity.to_lowercase().as_str() {
                "none" | "even" | "odd" => {}
                _ => {
                    return Err(format!(
                        "invalid parity '{}' (use none, even, or odd)",
                        parity
                    ));
                }
            },
            ProtocolConfig::Simulated {
                production_period_ms: 0,
            } => return Err("protocol.production_period_ms must be positive".to_string()),
            _ => {}
        }

        agent.tag_map.validate()
    }
}

impl BridgeConfig for AgentConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.agent.key_prefix
    }

    fn serialization(&self) -> Format {
        self.serialization
    }

    fn validate(&self) -> linesight_bridge_framework::Result<()> {
        self.validate_agent().map_err(BridgeError::validation)
    }
}
