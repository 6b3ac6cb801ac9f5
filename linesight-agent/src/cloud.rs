//! Cloud channel abstraction (device twin, events, direct methods).

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use linesight_common::{DesiredProperties, MethodReply, ReportedProperties, TwinDocument};

use crate::error::CloudError;

/// Device-to-cloud event stream an outbound payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Telemetry,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Telemetry => f.write_str("telemetry"),
            EventKind::Error => f.write_str("error"),
        }
    }
}

/// Cloud-to-device traffic for one device.
#[derive(Debug)]
pub enum InboundEvent {
    /// A desired-properties patch.
    Desired(DesiredProperties),
    /// A direct method invocation. The reply must be sent exactly once.
    Method {
        name: String,
        reply: oneshot::Sender<MethodReply>,
    },
}

/// Per-device connection to the device-management service.
#[async_trait]
pub trait CloudChannel: Send + Sync {
    /// Fetch the full twin (desired and reported documents).
    async fn get_twin(&self) -> Result<TwinDocument, CloudError>;

    /// Patch the reported document.
    async fn update_reported(&self, patch: &ReportedProperties) -> Result<(), CloudError>;

    /// Send an already-serialized event.
    async fn send_event(
        &self,
        kind: EventKind,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<(), CloudError>;

    /// Start receiving desired patches and method calls.
    ///
    /// Exactly one consumer per device; dropping the receiver detaches.
    async fn attach(&self) -> Result<mpsc::Receiver<InboundEvent>, CloudError>;

    /// Release every subscription held by the channel.
    async fn close(&self);
}
