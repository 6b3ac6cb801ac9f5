//! Protocol client abstraction.
//!
//! The agent never speaks a field protocol directly. It consumes an
//! already-connected client through [`ProtocolClient`]; concrete adapters
//! live in [`crate::modbus`] and [`crate::mock`].

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::ClientError;
use crate::tags::TagValue;

/// Link state as seen by the protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Access to an industrial protocol endpoint.
///
/// Node paths are `<node_id>/<TagName>` for tags. Methods are invoked on the
/// device node itself.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Read the current value of a node.
    async fn read_tag(&self, node: &str) -> Result<TagValue, ClientError>;

    /// Write a value to a node.
    async fn write_tag(&self, node: &str, value: TagValue) -> Result<(), ClientError>;

    /// Receive a value each time the node changes.
    ///
    /// The current value is delivered first. Dropping the receiver
    /// unsubscribes.
    async fn subscribe(&self, node: &str) -> Result<mpsc::Receiver<TagValue>, ClientError>;

    /// Call method `method` on device `node`.
    async fn invoke_method(&self, node: &str, method: &str) -> Result<(), ClientError>;

    /// Connection state feed. Repeated values are possible and must be
    /// handled idempotently.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}
