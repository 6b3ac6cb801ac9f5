//! Error taxonomy for the agent.

use thiserror::Error;

use linesight_bridge_framework::BridgeError;

use crate::tags::Tag;

/// Result type alias using [`AgentError`].
pub type Result<T> = std::result::Result<T, AgentError>;

/// Failures reported by a protocol client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// The endpoint is not connected.
    #[error("Not connected: {0}")]
    Disconnected(String),

    /// The request did not complete in time.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The endpoint answered with a non-good status.
    #[error("Bad status for '{node}': {status}")]
    BadStatus { node: String, status: String },

    /// The node is not part of the address space.
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    /// A method call was rejected by the endpoint.
    #[error("Method '{method}' failed: {reason}")]
    MethodFailed { method: String, reason: String },
}

impl ClientError {
    /// Whether the failure means the endpoint itself is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Timeout(_))
    }
}

/// A tag could not be read as a value of the expected type.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReadError {
    #[error("Tag {tag} unreachable: {source}")]
    Connectivity {
        tag: Tag,
        #[source]
        source: ClientError,
    },

    #[error("Tag {tag} read failed: {source}")]
    BadStatus {
        tag: Tag,
        #[source]
        source: ClientError,
    },

    #[error("Tag {tag} holds {actual}, expected {expected}")]
    TypeMismatch {
        tag: Tag,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Tag {tag} holds out-of-range value {value}")]
    OutOfRange { tag: Tag, value: String },
}

impl ReadError {
    /// Classify a client failure for `tag`.
    pub fn from_client(tag: Tag, source: ClientError) -> Self {
        if source.is_connectivity() {
            Self::Connectivity { tag, source }
        } else {
            Self::BadStatus { tag, source }
        }
    }

    /// Connectivity failures suspend telemetry; all others skip one tick.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }

    pub fn tag(&self) -> Tag {
        match self {
            Self::Connectivity { tag, .. }
            | Self::BadStatus { tag, .. }
            | Self::TypeMismatch { tag, .. }
            | Self::OutOfRange { tag, .. } => *tag,
        }
    }
}

/// A desired property could not be applied. The previous value is kept.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigParseError {
    #[error("Invalid send frequency '{0}' (expected a number followed by s, m or h)")]
    Frequency(String),

    #[error("Send interval {0}s must be greater than 2s")]
    IntervalTooShort(f64),

    #[error("Send interval {0}s is too large")]
    IntervalTooLong(f64),

    #[error("Production rate {0} outside 0..=100")]
    RateOutOfRange(String),
}

/// A direct method failed at the protocol endpoint.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Command {command} failed on '{node}': {source}")]
pub struct CommandError {
    pub command: &'static str,
    pub node: String,
    #[source]
    pub source: ClientError,
}

/// A device could not be admitted to the fleet.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistrationError {
    #[error("Device '{device}' not admitted: {passed} of {total} required tags readable")]
    TagsUnreadable {
        device: String,
        passed: usize,
        total: usize,
    },

    #[error("Device '{0}' is already registered")]
    Duplicate(String),

    #[error("Device '{device}' failed to start: {reason}")]
    Setup { device: String, reason: String },
}

/// Failures reported by a cloud channel.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("Cloud channel closed")]
    Closed,

    #[error("Twin unavailable: {0}")]
    TwinUnavailable(String),

    #[error("Invalid cloud payload: {0}")]
    Payload(String),

    #[error("Zenoh error: {0}")]
    Zenoh(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl From<zenoh::Error> for CloudError {
    fn from(err: zenoh::Error) -> Self {
        Self::Zenoh(err.to_string())
    }
}

impl From<linesight_common::Error> for CloudError {
    fn from(err: linesight_common::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

/// Top-level agent error.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    ConfigParse(#[from] ConfigParseError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Protocol client error: {0}")]
    Client(#[from] ClientError),

    #[error("Cloud channel error: {0}")]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_classification() {
        let lost = ReadError::from_client(Tag::GoodCount, ClientError::Disconnected("eof".into()));
        assert!(lost.is_connectivity());
        assert_eq!(lost.tag(), Tag::GoodCount);

        let timeout = ReadError::from_client(Tag::Temperature, ClientError::Timeout(500));
        assert!(timeout.is_connectivity());

        let bad = ReadError::from_client(
            Tag::Temperature,
            ClientError::BadStatus {
                node: "ns=2;s=Device 1/Temperature".into(),
                status: "BadWaitingForInitialData".into(),
            },
        );
        assert!(!bad.is_connectivity());
    }

    #[test]
    fn test_registration_diagnostic() {
        let err = RegistrationError::TagsUnreadable {
            device: "line-3".into(),
            passed: 3,
            total: 7,
        };
        assert_eq!(
            err.to_string(),
            "Device 'line-3' not admitted: 3 of 7 required tags readable"
        );
    }
}
