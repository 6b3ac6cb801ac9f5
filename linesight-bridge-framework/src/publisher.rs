//! Payload publisher for Zenoh.

use std::sync::Arc;

use linesight_common::{Format, encode};
use serde::Serialize;
use zenoh::bytes::Encoding;

use crate::error::{BridgeError, Result};

/// Publisher for sending serialized payloads to Zenoh.
///
/// Wraps a shared Zenoh session; every device channel clones one.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    key_prefix: String,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            key_prefix: key_prefix.into(),
            format,
        }
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Get the serialization format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Serialize `value` in the configured format and put it on `key`.
    pub async fn publish<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload =
            encode(value, self.format).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.publish_raw(key, payload, self.format.mime_type()).await
    }

    /// Publish a JSON document regardless of the configured format.
    pub async fn publish_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload, Format::Json.mime_type()).await
    }

    /// Publish pre-encoded bytes tagged with `content_type`.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>, content_type: &str) -> Result<()> {
        self.session
            .put(key, payload)
            .encoding(Encoding::from(content_type))
            .await
            .map_err(|e| BridgeError::publish(key, e))?;

        tracing::trace!(key = %key, content_type = %content_type, "Published");
        Ok(())
    }
}
