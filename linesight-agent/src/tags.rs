//! Typed access to the tags of one production line.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::ProtocolClient;
use crate::error::ReadError;

/// The data points every admitted device must expose.
///
/// A tag is addressed as `<node_id>/<TagName>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tag {
    ProductionStatus,
    ProductionRate,
    WorkorderId,
    Temperature,
    GoodCount,
    BadCount,
    DeviceError,
}

impl Tag {
    /// Every required tag, in admission-check order.
    pub const ALL: [Tag; 7] = [
        Tag::ProductionStatus,
        Tag::ProductionRate,
        Tag::WorkorderId,
        Tag::Temperature,
        Tag::GoodCount,
        Tag::BadCount,
        Tag::DeviceError,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tag::ProductionStatus => "ProductionStatus",
            Tag::ProductionRate => "ProductionRate",
            Tag::WorkorderId => "WorkorderId",
            Tag::Temperature => "Temperature",
            Tag::GoodCount => "GoodCount",
            Tag::BadCount => "BadCount",
            Tag::DeviceError => "DeviceError",
        }
    }

    pub fn from_name(name: &str) -> Option<Tag> {
        Tag::ALL.into_iter().find(|tag| tag.name() == name)
    }

    /// Full node path of this tag on device `node`.
    pub fn node_path(&self, node: &str) -> String {
        format!("{}/{}", node, self.name())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raw value read from or written to a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TagValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            TagValue::Bool(_) => "bool",
            TagValue::Int(_) => "int",
            TagValue::Float(_) => "float",
            TagValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(v) => write!(f, "{}", v),
            TagValue::Int(v) => write!(f, "{}", v),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Text(v) => write!(f, "{:?}", v),
        }
    }
}

/// Conversion from a raw tag value to a typed one.
pub trait FromTagValue: Sized {
    const TYPE_NAME: &'static str;

    /// `Err` carries the offending value when it has the right type but an
    /// invalid range; `Ok(None)` means the type does not match.
    fn from_tag_value(value: &TagValue) -> Result<Option<Self>, String>;
}

impl FromTagValue for i64 {
    const TYPE_NAME: &'static str = "int";

    fn from_tag_value(value: &TagValue) -> Result<Option<Self>, String> {
        Ok(match value {
            TagValue::Int(v) => Some(*v),
            _ => None,
        })
    }
}

impl FromTagValue for u64 {
    const TYPE_NAME: &'static str = "unsigned int";

    fn from_tag_value(value: &TagValue) -> Result<Option<Self>, String> {
        match value {
            TagValue::Int(v) => u64::try_from(*v).map(Some).map_err(|_| v.to_string()),
            _ => Ok(None),
        }
    }
}

impl FromTagValue for u8 {
    const TYPE_NAME: &'static str = "percentage";

    fn from_tag_value(value: &TagValue) -> Result<Option<Self>, String> {
        match value {
            TagValue::Int(v) if (0..=100).contains(v) => Ok(Some(*v as u8)),
            TagValue::Int(v) => Err(v.to_string()),
            _ => Ok(None),
        }
    }
}

impl FromTagValue for f64 {
    const TYPE_NAME: &'static str = "float";

    fn from_tag_value(value: &TagValue) -> Result<Option<Self>, String> {
        Ok(match value {
            TagValue::Float(v) => Some(*v),
            TagValue::Int(v) => Some(*v as f64),
            _ => None,
        })
    }
}

impl FromTagValue for String {
    const TYPE_NAME: &'static str = "text";

    fn from_tag_value(value: &TagValue) -> Result<Option<Self>, String> {
        Ok(match value {
            TagValue::Text(v) => Some(v.clone()),
            _ => None,
        })
    }
}

impl FromTagValue for ProductionStatus {
    const TYPE_NAME: &'static str = "production status";

    fn from_tag_value(value: &TagValue) -> Result<Option<Self>, String> {
        match value {
            TagValue::Int(0) => Ok(Some(ProductionStatus::Stopped)),
            TagValue::Int(1) => Ok(Some(ProductionStatus::Running)),
            TagValue::Int(v) => Err(v.to_string()),
            _ => Ok(None),
        }
    }
}

impl FromTagValue for DeviceErrors {
    const TYPE_NAME: &'static str = "error flags";

    fn from_tag_value(value: &TagValue) -> Result<Option<Self>, String> {
        match value {
            TagValue::Int(v) => u32::try_from(*v)
                .map(|bits| Some(DeviceErrors(bits)))
                .map_err(|_| v.to_string()),
            _ => Ok(None),
        }
    }
}

/// Whether the line is producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionStatus {
    Stopped = 0,
    Running = 1,
}

impl ProductionStatus {
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

/// Error flag set of the `DeviceError` tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceErrors(pub u32);

impl DeviceErrors {
    pub const NONE: DeviceErrors = DeviceErrors(0);
    pub const EMERGENCY_STOP: DeviceErrors = DeviceErrors(1);
    pub const POWER_FAILURE: DeviceErrors = DeviceErrors(2);
    pub const SENSOR_FAILURE: DeviceErrors = DeviceErrors(4);
    pub const UNKNOWN: DeviceErrors = DeviceErrors(8);

    const NAMED: [(DeviceErrors, &'static str); 4] = [
        (Self::EMERGENCY_STOP, "EmergencyStop"),
        (Self::POWER_FAILURE, "PowerFailure"),
        (Self::SENSOR_FAILURE, "SensorFailure"),
        (Self::UNKNOWN, "Unknown"),
    ];

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: DeviceErrors) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl fmt::Display for DeviceErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "{:#x}", self.0)
        } else {
            f.write_str(&names.join(", "))
        }
    }
}

/// One consistent read of every telemetry tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSnapshot {
    pub production_status: ProductionStatus,
    pub workorder_id: String,
    /// Cumulative since the endpoint started.
    pub good_count: u64,
    /// Cumulative since the endpoint started.
    pub bad_count: u64,
    pub temperature: f64,
    pub errors: DeviceErrors,
}

/// Typed reads against the tags of a single device.
#[derive(Clone)]
pub struct TagRepository {
    client: Arc<dyn ProtocolClient>,
    node: String,
}

impl TagRepository {
    pub fn new(client: Arc<dyn ProtocolClient>, node: impl Into<String>) -> Self {
        Self {
            client,
            node: node.into(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Read `tag` and convert it to `T`.
    pub async fn get_value<T: FromTagValue>(&self, tag: Tag) -> Result<T, ReadError> {
        let raw = self
            .client
            .read_tag(&tag.node_path(&self.node))
            .await
            .map_err(|e| ReadError::from_client(tag, e))?;

        match T::from_tag_value(&raw) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ReadError::TypeMismatch {
                tag,
                expected: T::TYPE_NAME,
                actual: raw.type_name(),
            }),
            Err(value) => Err(ReadError::OutOfRange { tag, value }),
        }
    }

    pub async fn production_status(&self) -> Result<ProductionStatus, ReadError> {
        self.get_value(Tag::ProductionStatus).await
    }

    pub async fn production_rate(&self) -> Result<u8, ReadError> {
        self.get_value(Tag::ProductionRate).await
    }

    pub async fn workorder_id(&self) -> Result<String, ReadError> {
        self.get_value(Tag::WorkorderId).await
    }

    pub async fn good_count(&self) -> Result<u64, ReadError> {
        self.get_value(Tag::GoodCount).await
    }

    pub async fn bad_count(&self) -> Result<u64, ReadError> {
        self.get_value(Tag::BadCount).await
    }

    pub async fn temperature(&self) -> Result<f64, ReadError> {
        self.get_value(Tag::Temperature).await
    }

    pub async fn device_errors(&self) -> Result<DeviceErrors, ReadError> {
        self.get_value(Tag::DeviceError).await
    }

    /// One cheap read; `false` on any read error.
    pub async fn check_connection(&self) -> bool {
        match self.production_status().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(node = %self.node, error = %e, "Connection check failed");
                false
            }
        }
    }

    /// Try every required tag independently and count the readable ones.
    ///
    /// Only used at admission; a tag counts as readable when the endpoint
    /// returns a good status, whatever its type.
    pub async fn count_readable_tags(&self) -> usize {
        let mut passed = 0;
        for tag in Tag::ALL {
            match self.client.read_tag(&tag.node_path(&self.node)).await {
                Ok(_) => passed += 1,
                Err(e) => {
                    tracing::warn!(node = %self.node, tag = %tag, error = %e, "Tag not readable");
                }
            }
        }
        passed
    }

    /// Read every telemetry tag. The first failure aborts the snapshot.
    pub async fn snapshot(&self) -> Result<TagSnapshot, ReadError> {
        Ok(TagSnapshot {
            production_status: self.production_status().await?,
            workorder_id: self.workorder_id().await?,
            good_count: self.good_count().await?,
            bad_count: self.bad_count().await?,
            temperature: self.temperature().await?,
            errors: self.device_errors().await?,
        })
    }
}
