//! In-process collaborators.
//!
//! [`SimulatedClient`] stands in for a production line and backs the
//! `simulated` protocol mode. [`RecordingChannel`] is a cloud channel that
//! keeps everything it is sent, for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use linesight_common::{
    DesiredProperties, ErrorAlert, MethodReply, ReportedProperties, TelemetryMessage,
    TwinDocument, decode_auto,
};

use crate::client::{ConnectionState, ProtocolClient};
use crate::cloud::{CloudChannel, EventKind, InboundEvent};
use crate::command::DeviceCommand;
use crate::error::{ClientError, CloudError};
use crate::tags::{DeviceErrors, Tag, TagValue};

const SUBSCRIPTION_BUFFER: usize = 16;

#[derive(Default)]
struct LineState {
    values: HashMap<String, TagValue>,
    failures: HashMap<String, ClientError>,
    method_failures: HashMap<String, ClientError>,
    invocations: Vec<String>,
    writes: Vec<(String, TagValue)>,
    subscribers: HashMap<String, Vec<mpsc::Sender<TagValue>>>,
    connected: bool,
}

impl LineState {
    fn store(&mut self, path: String, value: TagValue) {
        if let Some(subscribers) = self.subscribers.get_mut(&path) {
            subscribers.retain(|tx| !tx.is_closed());
            for tx in subscribers.iter() {
                if tx.try_send(value.clone()).is_err() {
                    tracing::debug!(node = %path, "Subscriber lagging, dropping notification");
                }
            }
        }
        self.values.insert(path, value);
    }

    fn int(&self, path: &str) -> i64 {
        match self.values.get(path) {
            Some(TagValue::Int(v)) => *v,
            _ => 0,
        }
    }
}

/// A production line simulated in memory.
///
/// Exposes the seven required tags and both methods on one device node.
/// `EmergencyStop` halts production and raises the emergency-stop flag;
/// `ResetErrorStatus` clears every flag.
pub struct SimulatedClient {
    node: String,
    state: Mutex<LineState>,
    connection: watch::Sender<ConnectionState>,
}

impl SimulatedClient {
    /// A connected, running line with zeroed counters.
    pub fn new(node: impl Into<String>) -> Self {
        let node = node.into();
        let mut state = LineState {
            connected: true,
            ..Default::default()
        };
        for (tag, value) in [
            (Tag::ProductionStatus, TagValue::Int(1)),
            (Tag::ProductionRate, TagValue::Int(100)),
            (Tag::WorkorderId, TagValue::Text("00000000-0000-0000-0000-000000000000".into())),
            (Tag::Temperature, TagValue::Float(60.0)),
            (Tag::GoodCount, TagValue::Int(0)),
            (Tag::BadCount, TagValue::Int(0)),
            (Tag::DeviceError, TagValue::Int(0)),
        ] {
            state.values.insert(tag.node_path(&node), value);
        }

        let (connection, _) = watch::channel(ConnectionState::Connected);
        Self {
            node,
            state: Mutex::new(state),
            connection,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LineState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Set a tag value, notifying subscribers.
    pub fn set_tag(&self, tag: Tag, value: TagValue) {
        let path = tag.node_path(&self.node);
        self.with_state(|s| s.store(path, value));
    }

    pub fn tag(&self, tag: Tag) -> Option<TagValue> {
        let path = tag.node_path(&self.node);
        self.with_state(|s| s.values.get(&path).cloned())
    }

    /// Make reads and writes of `tag` fail with `error`.
    pub fn fail_tag(&self, tag: Tag, error: ClientError) {
        let path = tag.node_path(&self.node);
        self.with_state(|s| s.failures.insert(path, error));
    }

    pub fn clear_failure(&self, tag: Tag) {
        let path = tag.node_path(&self.node);
        self.with_state(|s| s.failures.remove(&path));
    }

    /// Make method `name` fail with `error`.
    pub fn fail_method(&self, name: &str, error: ClientError) {
        self.with_state(|s| s.method_failures.insert(name.to_string(), error));
    }

    /// Names of the methods invoked so far.
    pub fn invocations(&self) -> Vec<String> {
        self.with_state(|s| s.invocations.clone())
    }

    /// Successful writes so far, as `(node path, value)`.
    pub fn writes(&self) -> Vec<(String, TagValue)> {
        self.with_state(|s| s.writes.clone())
    }

    /// Drop the link. Reads fail with a connectivity error until reconnected.
    pub fn disconnect(&self) {
        self.with_state(|s| s.connected = false);
        self.connection.send_replace(ConnectionState::Disconnected);
    }

    pub fn reconnect(&self) {
        self.with_state(|s| s.connected = true);
        self.connection.send_replace(ConnectionState::Connected);
    }

    /// Re-announce the current state on the connection feed.
    pub fn announce(&self, state: ConnectionState) {
        self.connection.send_replace(state);
    }

    /// Add to the cumulative counters.
    pub fn produce(&self, good: i64, bad: i64) {
        let good_path = Tag::GoodCount.node_path(&self.node);
        let bad_path = Tag::BadCount.node_path(&self.node);
        self.with_state(|s| {
            let good_total = s.int(&good_path) + good;
            let bad_total = s.int(&bad_path) + bad;
            s.store(good_path, TagValue::Int(good_total));
            s.store(bad_path, TagValue::Int(bad_total));
        });
    }

    /// Run the line: every `period`, while running, produce according to the
    /// current rate with a bad part every few cycles, and drift temperature.
    pub fn spawn_production(self: std::sync::Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut cycle: u64 = 0;
            loop {
                interval.tick().await;
                cycle += 1;

                let running = matches!(self.tag(Tag::ProductionStatus), Some(TagValue::Int(1)));
                if !running {
                    continue;
                }
                let rate = match self.tag(Tag::ProductionRate) {
                    Some(TagValue::Int(rate)) => rate,
                    _ => 0,
                };
                let bad = i64::from(cycle % 7 == 0);
                self.produce(rate / 10, bad);
                self.set_tag(
                    Tag::Temperature,
                    TagValue::Float(60.0 + (cycle % 20) as f64 * 0.5),
                );
                if cycle % 97 == 0 {
                    self.raise_error(DeviceErrors::SENSOR_FAILURE);
                }
            }
        })
    }

    fn raise_error(&self, flag: DeviceErrors) {
        let path = Tag::DeviceError.node_path(&self.node);
        self.with_state(|s| {
            let bits = s.int(&path) | i64::from(flag.bits());
            s.store(path, TagValue::Int(bits));
        });
    }

    fn check_connected(&self, state: &LineState) -> Result<(), ClientError> {
        if state.connected {
            Ok(())
        } else {
            Err(ClientError::Disconnected(format!("{} offline", self.node)))
        }
    }
}

#[async_trait]
impl ProtocolClient for SimulatedClient {
    async fn read_tag(&self, node: &str) -> Result<TagValue, ClientError> {
        self.with_state(|s| {
            self.check_connected(s)?;
            if let Some(error) = s.failures.get(node) {
                return Err(error.clone());
            }
            s.values
                .get(node)
                .cloned()
                .ok_or_else(|| ClientError::UnknownNode(node.to_string()))
        })
    }

    async fn write_tag(&self, node: &str, value: TagValue) -> Result<(), ClientError> {
        self.with_state(|s| {
            self.check_connected(s)?;
            if let Some(error) = s.failures.get(node) {
                return Err(error.clone());
            }
            if !s.values.contains_key(node) {
                return Err(ClientError::UnknownNode(node.to_string()));
            }
            s.writes.push((node.to_string(), value.clone()));
            s.store(node.to_string(), value);
            Ok(())
        })
    }

    async fn subscribe(&self, node: &str) -> Result<mpsc::Receiver<TagValue>, ClientError> {
        self.with_state(|s| {
            self.check_connected(s)?;
            let current = s
                .values
                .get(node)
                .cloned()
                .ok_or_else(|| ClientError::UnknownNode(node.to_string()))?;

            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            let _ = tx.try_send(current);
            s.subscribers.entry(node.to_string()).or_default().push(tx);
            Ok(rx)
        })
    }

    async fn invoke_method(&self, node: &str, method: &str) -> Result<(), ClientError> {
        if node != self.node {
            return Err(ClientError::UnknownNode(node.to_string()));
        }
        let status_path = Tag::ProductionStatus.node_path(&self.node);
        let error_path = Tag::DeviceError.node_path(&self.node);

        self.with_state(|s| {
            self.check_connected(s)?;
            if let Some(error) = s.method_failures.get(method) {
                return Err(error.clone());
            }
            match DeviceCommand::from_name(method) {
                Some(DeviceCommand::EmergencyStop) => {
                    let bits = s.int(&error_path) | i64::from(DeviceErrors::EMERGENCY_STOP.bits());
                    s.store(status_path, TagValue::Int(0));
                    s.store(error_path, TagValue::Int(bits));
                }
                Some(DeviceCommand::ResetErrorStatus) => {
                    s.store(error_path, TagValue::Int(0));
                }
                None => {
                    return Err(ClientError::MethodFailed {
                        method: method.to_string(),
                        reason: "BadMethodInvalid".to_string(),
                    });
                }
            }
            s.invocations.push(method.to_string());
            Ok(())
        })
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }
}

/// An outbound event captured by [`RecordingChannel`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub kind: EventKind,
    pub payload: Vec<u8>,
    pub content_type: String,
}

/// Cloud channel that records outbound traffic and lets tests inject
/// desired patches and method calls.
#[derive(Default)]
pub struct RecordingChannel {
    twin: Mutex<TwinDocument>,
    twin_unavailable: AtomicBool,
    events: Mutex<Vec<RecordedEvent>>,
    reported: Mutex<Vec<ReportedProperties>>,
    inbound: Mutex<Option<mpsc::Sender<InboundEvent>>>,
    closed: AtomicBool,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `desired` as the twin's desired document.
    pub fn with_desired(desired: DesiredProperties) -> Self {
        let channel = Self::default();
        locked(&channel.twin).desired = desired;
        channel
    }

    /// Make `get_twin` fail.
    pub fn without_twin() -> Self {
        let channel = Self::default();
        channel.twin_unavailable.store(true, Ordering::SeqCst);
        channel
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        locked(&self.events).clone()
    }

    /// Decoded telemetry messages, oldest first.
    pub fn telemetry(&self) -> Vec<TelemetryMessage> {
        self.decoded(EventKind::Telemetry)
    }

    /// Decoded error alerts, oldest first.
    pub fn alerts(&self) -> Vec<ErrorAlert> {
        self.decoded(EventKind::Error)
    }

    fn decoded<T: serde::de::DeserializeOwned>(&self, kind: EventKind) -> Vec<T> {
        locked(&self.events)
            .iter()
            .filter(|e| e.kind == kind)
            .filter_map(|e| decode_auto(&e.payload).ok())
            .collect()
    }

    /// Reported patches, in the order they were written.
    pub fn reported(&self) -> Vec<ReportedProperties> {
        locked(&self.reported).clone()
    }

    /// Merged reported document.
    pub fn reported_state(&self) -> ReportedProperties {
        let mut merged = ReportedProperties::default();
        for patch in locked(&self.reported).iter() {
            merged.merge(patch);
        }
        merged
    }

    pub fn is_attached(&self) -> bool {
        locked(&self.inbound).as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn consumer(&self) -> Option<mpsc::Sender<InboundEvent>> {
        locked(&self.inbound).clone()
    }

    /// Deliver a desired patch. Returns `false` when nothing is attached.
    pub async fn push_desired(&self, desired: DesiredProperties) -> bool {
        match self.consumer() {
            Some(tx) => tx.send(InboundEvent::Desired(desired)).await.is_ok(),
            None => false,
        }
    }

    /// Invoke a direct method and wait for the reply.
    pub async fn invoke(&self, name: &str) -> Option<MethodReply> {
        let tx = self.consumer()?;
        let (reply, response) = oneshot::channel();
        tx.send(InboundEvent::Method {
            name: name.to_string(),
            reply,
        })
        .await
        .ok()?;
        response.await.ok()
    }
}

#[async_trait]
impl CloudChannel for RecordingChannel {
    async fn get_twin(&self) -> Result<TwinDocument, CloudError> {
        if self.twin_unavailable.load(Ordering::SeqCst) {
            return Err(CloudError::TwinUnavailable("no twin stored".into()));
        }
        Ok(locked(&self.twin).clone())
    }

    async fn update_reported(&self, patch: &ReportedProperties) -> Result<(), CloudError> {
        if self.is_closed() {
            return Err(CloudError::Closed);
        }
        locked(&self.reported).push(patch.clone());
        Ok(())
    }

    async fn send_event(
        &self,
        kind: EventKind,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<(), CloudError> {
        if self.is_closed() {
            return Err(CloudError::Closed);
        }
        locked(&self.events).push(RecordedEvent {
            kind,
            payload,
            content_type: content_type.to_string(),
        });
        Ok(())
    }

    async fn attach(&self) -> Result<mpsc::Receiver<InboundEvent>, CloudError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        *locked(&self.inbound) = Some(tx);
        Ok(rx)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        locked(&self.inbound).take();
    }
}
