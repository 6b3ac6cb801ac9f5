//! [`CloudChannel`] over Zenoh.
//!
//! Each device gets its own key space (see [`DeviceKeys`]). The twin is
//! fetched with a query, desired patches arrive on a subscriber and direct
//! methods are served by a queryable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use linesight_bridge_framework::Publisher;
use linesight_common::{
    Channel, DesiredProperties, DeviceKeys, MethodReply, ReportedProperties, TwinDocument,
    decode_auto, parse_key_expr,
};

use crate::cloud::{CloudChannel, EventKind, InboundEvent};
use crate::error::CloudError;

const INBOUND_BUFFER: usize = 32;

/// Zenoh-backed channel for one device.
pub struct ZenohCloudChannel {
    publisher: Publisher,
    keys: DeviceKeys,
    twin_timeout: Duration,
    reported: Mutex<ReportedProperties>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ZenohCloudChannel {
    pub fn new(publisher: Publisher, device: &str, twin_timeout: Duration) -> Self {
        let keys = DeviceKeys::with_prefix(publisher.key_prefix(), device);
        Self {
            publisher,
            keys,
            twin_timeout,
            reported: Mutex::new(ReportedProperties::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn keys(&self) -> &DeviceKeys {
        &self.keys
    }
}

#[async_trait]
impl CloudChannel for ZenohCloudChannel {
    async fn get_twin(&self) -> Result<TwinDocument, CloudError> {
        let key = self.keys.twin();
        let replies = self
            .publisher
            .session()
            .get(key.as_str())
            .timeout(self.twin_timeout)
            .await?;

        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    let payload = sample.payload().to_bytes();
                    let twin: TwinDocument = decode_auto(&payload)?;
                    self.reported.lock().await.merge(&twin.reported);
                    tracing::debug!(key = %key, "Twin received");
                    return Ok(twin);
                }
                Err(err) => {
                    let payload = err.payload().to_bytes();
                    tracing::warn!(
                        key = %key,
                        error = %String::from_utf8_lossy(&payload),
                        "Twin query returned an error"
                    );
                }
            }
        }

        Err(CloudError::TwinUnavailable(format!("no reply on {}", key)))
    }

    async fn update_reported(&self, patch: &ReportedProperties) -> Result<(), CloudError> {
        // Publish the whole document so late subscribers see every property.
        let document = {
            let mut reported = self.reported.lock().await;
            reported.merge(patch);
            reported.clone()
        };
        self.publisher
            .publish_json(&self.keys.reported(), &document)
            .await?;
        Ok(())
    }

    async fn send_event(
        &self,
        kind: EventKind,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<(), CloudError> {
        let key = match kind {
            EventKind::Telemetry => self.keys.telemetry(),
            EventKind::Error => self.keys.error_events(),
        };
        self.publisher.publish_raw(&key, payload, content_type).await?;
        Ok(())
    }

    async fn attach(&self) -> Result<mpsc::Receiver<InboundEvent>, CloudError> {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let session = self.publisher.session().clone();

        let subscriber = session.declare_subscriber(self.keys.desired()).await?;
        let queryable = session.declare_queryable(self.keys.methods_wildcard()).await?;

        let device = self.keys.device().to_string();
        let desired_tx = tx.clone();
        let desired_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    sample = subscriber.recv_async() => {
                        let Ok(sample) = sample else { break };
                        let payload = sample.payload().to_bytes();
                        match decode_auto::<DesiredProperties>(&payload) {
                            Ok(desired) => {
                                if desired_tx.send(InboundEvent::Desired(desired)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(device = %device, error = %e, "Ignoring malformed desired patch");
                            }
                        }
                    }
                    _ = desired_tx.closed() => break,
                }
            }
            tracing::debug!(device = %device, "Desired subscriber released");
        });

        let prefix = self.publisher.key_prefix().to_string();
        let device = self.keys.device().to_string();
        let method_task = tokio::spawn(async move {
            loop {
                let query = tokio::select! {
                    query = queryable.recv_async() => match query {
                        Ok(query) => query,
                        Err(_) => break,
                    },
                    _ = tx.closed() => break,
                };

                let key = query.key_expr().clone();
                let name = match parse_key_expr(&prefix, key.as_str()) {
                    Some(parsed) if parsed.device == device => match parsed.channel {
                        Channel::Method(name) => Some(name),
                        _ => None,
                    },
                    _ => None,
                };

                let reply = match name {
                    Some(name) => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        let event = InboundEvent::Method {
                            name,
                            reply: reply_tx,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                        reply_rx
                            .await
                            .unwrap_or_else(|_| MethodReply::failure("device shut down"))
                    }
                    None => MethodReply::not_found(key.as_str()),
                };

                match serde_json::to_vec(&reply) {
                    Ok(bytes) => {
                        if let Err(e) = query.reply(key.clone(), bytes).await {
                            tracing::warn!(device = %device, key = %key, error = %e, "Method reply failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(device = %device, error = %e, "Cannot encode method reply");
                    }
                }
            }
            tracing::debug!(device = %device, "Method queryable released");
        });

        self.tasks.lock().await.extend([desired_task, method_task]);
        tracing::info!(device = %self.keys.device(), "Attached to cloud channel");
        Ok(rx)
    }

    async fn close(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        tracing::debug!(device = %self.keys.device(), "Cloud channel closed");
    }
}

/// Build one channel per device on a shared publisher.
pub fn channel_for(publisher: &Publisher, device: &str, twin_timeout: Duration) -> Arc<dyn CloudChannel> {
    Arc::new(ZenohCloudChannel::new(publisher.clone(), device, twin_timeout))
}
