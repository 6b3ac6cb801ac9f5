//! Per-device facade.
//!
//! A [`DeviceFacade`] ties one production line to its cloud twin. It owns:
//! - the desired configuration, counter baselines, error monitor and
//!   production window, behind one per-device lock
//! - the device's [`TelemetryScheduler`]
//! - one dispatcher task, the single consumer of everything inbound
//!   (desired patches, methods, error notifications, connection changes,
//!   throttle decisions)
//!
//! Ticks run on the scheduler task, so a slow telemetry send never delays
//! method replies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use linesight_common::{DesiredProperties, Format, ReportedProperties, encode};

use crate::client::{ConnectionState, ProtocolClient};
use crate::cloud::{CloudChannel, EventKind, InboundEvent};
use crate::command;
use crate::error::Result;
use crate::monitor::{ErrorMonitor, forward_error_notifications};
use crate::rate::{ProductionWindow, RateDecision, RatePolicy};
use crate::scheduler::{
    ProductionCounters, SchedulerState, TelemetrySample, TelemetryScheduler, TickHandler,
    TickOutcome,
};
use crate::tags::{DeviceErrors, Tag, TagRepository, TagValue};
use crate::twin::{DesiredConfig, DesiredUpdate};

const EVENT_BUFFER: usize = 32;

/// Quality throttle settings for one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateControl {
    pub policy: RatePolicy,
    pub window: Duration,
}

/// Static settings of one device.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// Name used in key expressions and logs.
    pub name: String,
    /// Protocol node the tags live under.
    pub node_id: String,
    /// Encoding of outbound events.
    pub format: Format,
    /// Interval used when the twin carries no valid send frequency.
    pub default_interval: Duration,
    /// `None` disables the throttle.
    pub rate_control: Option<RateControl>,
}

impl DeviceSettings {
    pub fn new(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_id: node_id.into(),
            format: Format::Json,
            default_interval: Duration::from_secs_f64(crate::twin::DEFAULT_SEND_FREQUENCY_SECS),
            rate_control: Some(RateControl {
                policy: RatePolicy::default(),
                window: Duration::from_secs(300),
            }),
        }
    }
}

struct DeviceState {
    desired: DesiredConfig,
    counters: ProductionCounters,
    errors: ErrorMonitor,
    window: Option<ProductionWindow>,
}

struct DeviceCore {
    name: String,
    node: String,
    tags: TagRepository,
    client: Arc<dyn ProtocolClient>,
    cloud: Arc<dyn CloudChannel>,
    format: Format,
    policy: Option<RatePolicy>,
    state: Mutex<DeviceState>,
    throttle: mpsc::Sender<RateDecision>,
}

impl DeviceCore {
    async fn send_message<T: Serialize + Sync>(&self, kind: EventKind, message: &T) {
        let payload = match encode(message, self.format) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(device = %self.name, kind = %kind, error = %e, "Failed to encode event");
                return;
            }
        };

        if let Err(e) = self
            .cloud
            .send_event(kind, payload, self.format.mime_type())
            .await
        {
            tracing::warn!(device = %self.name, kind = %kind, error = %e, "Failed to send event");
        }
    }

    async fn report(&self, patch: ReportedProperties) {
        if let Err(e) = self.cloud.update_reported(&patch).await {
            tracing::warn!(device = %self.name, error = %e, "Failed to update reported properties");
        }
    }

    async fn handle_inbound(&self, event: InboundEvent, scheduler: &TelemetryScheduler) {
        match event {
            InboundEvent::Desired(desired) => self.apply_desired(&desired, scheduler).await,
            InboundEvent::Method { name, reply } => {
                let response = command::dispatch(self.client.as_ref(), &self.node, &name).await;
                if reply.send(response).is_err() {
                    tracing::warn!(device = %self.name, method = %name, "Method caller went away");
                }
            }
        }
    }

    async fn apply_desired(&self, desired: &DesiredProperties, scheduler: &TelemetryScheduler) {
        let update = DesiredUpdate::parse(desired);
        if update.is_empty() {
            tracing::debug!(device = %self.name, "Desired patch has nothing to apply");
            return;
        }

        match update.production_rate {
            Some(Ok(rate)) => {
                self.set_production_rate(rate).await;
            }
            Some(Err(e)) => {
                tracing::warn!(device = %self.name, error = %e, "Rejected desired production rate");
            }
            None => {}
        }

        match update.send_frequency_secs {
            Some(Ok(secs)) => {
                let mut state = self.state.lock().await;
                if scheduler.set_interval(secs).is_ok() {
                    state.desired.send_frequency_secs = Some(secs);
                }
            }
            Some(Err(e)) => {
                tracing::warn!(device = %self.name, error = %e, "Rejected desired send frequency");
            }
            None => {}
        }
    }

    /// Write the rate to the line, then record it and report it.
    async fn set_production_rate(&self, rate: u8) -> bool {
        let node = Tag::ProductionRate.node_path(&self.node);
        if let Err(e) = self.client.write_tag(&node, TagValue::Int(i64::from(rate))).await {
            tracing::warn!(device = %self.name, rate, error = %e, "Failed to write production rate");
            return false;
        }

        self.state.lock().await.desired.production_rate = Some(rate);
        tracing::info!(device = %self.name, rate, "Production rate set");
        self.report(ReportedProperties::production_rate(rate)).await;
        true
    }

    async fn apply_throttle(&self, decision: RateDecision) {
        let current = self.state.lock().await.desired.production_rate;
        if current != Some(decision.current_rate) {
            tracing::debug!(device = %self.name, "Rate changed since window closed, skipping throttle");
            return;
        }

        tracing::info!(
            device = %self.name,
            from = decision.current_rate,
            to = decision.new_rate,
            ratio = decision.ratio.unwrap_or_default(),
            "Lowering production rate"
        );
        self.set_production_rate(decision.new_rate).await;
    }

    async fn on_error_flags(&self, flags: DeviceErrors) {
        let edge = self.state.lock().await.errors.observe(flags);

        if edge.increased {
            tracing::warn!(device = %self.name, errors = %flags, "Device errors increased");
        } else {
            tracing::info!(device = %self.name, errors = %flags, "Device errors changed");
        }

        self.send_message(EventKind::Error, &edge.to_alert(&self.node)).await;
        self.report(ReportedProperties::device_errors(flags.bits())).await;
    }

    /// Fetch the twin once, apply its desired document and report what the
    /// line currently shows.
    async fn sync_twin(&self, scheduler: &TelemetryScheduler) {
        match self.cloud.get_twin().await {
            Ok(twin) => self.apply_desired(&twin.desired, scheduler).await,
            Err(e) => {
                tracing::warn!(device = %self.name, error = %e, "Twin unavailable, using defaults");
            }
        }

        let mut patch = ReportedProperties::default();
        match self.tags.production_rate().await {
            Ok(observed) => {
                let mut state = self.state.lock().await;
                if state.desired.production_rate.is_none() {
                    state.desired.production_rate = Some(observed);
                    patch.production_rate = Some(observed);
                }
            }
            Err(e) => {
                tracing::warn!(device = %self.name, error = %e, "Could not read production rate");
            }
        }
        match self.tags.device_errors().await {
            Ok(errors) => patch.device_errors = Some(errors.bits()),
            Err(e) => {
                tracing::warn!(device = %self.name, error = %e, "Could not read device errors");
            }
        }

        if patch != ReportedProperties::default() {
            self.report(patch).await;
        }
    }

    fn close_window(&self, state: &mut DeviceState, sample: &TelemetrySample) -> Option<RateDecision> {
        let policy = self.policy?;
        let (good, bad) = state
            .window
            .as_mut()?
            .record(sample.delta_good, sample.delta_bad)?;
        let current = state.desired.production_rate?;

        let decision = policy.decide(current, good, bad);
        tracing::debug!(
            device = %self.name,
            good,
            bad,
            ratio = decision.ratio.unwrap_or_default(),
            "Production window closed"
        );
        decision.lowers_rate().then_some(decision)
    }
}

#[async_trait]
impl TickHandler for DeviceCore {
    async fn tick(&self) -> TickOutcome {
        let snapshot = match self.tags.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_connectivity() => {
                tracing::warn!(device = %self.name, error = %e, "Telemetry read failed");
                return TickOutcome::Disconnected;
            }
            Err(e) => {
                tracing::warn!(device = %self.name, error = %e, "Skipping telemetry tick");
                return TickOutcome::Skipped;
            }
        };

        let (sample, decision) = {
            let mut state = self.state.lock().await;
            let sample = state.counters.sample(&snapshot);
            let decision = self.close_window(&mut state, &sample);
            (sample, decision)
        };

        tracing::debug!(
            device = %self.name,
            good = sample.delta_good,
            bad = sample.delta_bad,
            temperature = sample.temperature,
            "Telemetry sample"
        );
        self.send_message(EventKind::Telemetry, &sample.to_message()).await;

        if let Some(decision) = decision {
            if self.throttle.try_send(decision).is_err() {
                tracing::warn!(device = %self.name, "Throttle decision dropped");
            }
        }

        TickOutcome::Sent
    }

    async fn desired_interval(&self) -> Option<f64> {
        self.state.lock().await.desired.send_frequency_secs
    }
}

async fn run_dispatcher(
    core: Arc<DeviceCore>,
    scheduler: Arc<TelemetryScheduler>,
    mut inbound: mpsc::Receiver<InboundEvent>,
    mut errors: mpsc::Receiver<DeviceErrors>,
    mut throttle: mpsc::Receiver<RateDecision>,
    mut connection: watch::Receiver<ConnectionState>,
) {
    loop {
        tokio::select! {
            Some(event) = inbound.recv() => core.handle_inbound(event, &scheduler).await,
            Some(flags) = errors.recv() => core.on_error_flags(flags).await,
            Some(decision) = throttle.recv() => core.apply_throttle(decision).await,
            Ok(()) = connection.changed() => {
                let state = *connection.borrow_and_update();
                match state {
                    ConnectionState::Connected => {
                        tracing::debug!(device = %core.name, "Endpoint connected");
                        scheduler.start().await;
                    }
                    ConnectionState::Disconnected => {
                        tracing::warn!(device = %core.name, "Endpoint disconnected");
                        scheduler.stop();
                    }
                }
            }
            else => break,
        }
    }
    tracing::debug!(device = %core.name, "Dispatcher stopped");
}

/// One admitted device.
pub struct DeviceFacade {
    core: Arc<DeviceCore>,
    scheduler: Arc<TelemetryScheduler>,
    monitor: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl DeviceFacade {
    /// Wire the device up: subscribe to its error flags, attach to the cloud
    /// channel, sync the twin, then start telemetry if the line is connected.
    pub async fn start(
        settings: DeviceSettings,
        client: Arc<dyn ProtocolClient>,
        cloud: Arc<dyn CloudChannel>,
    ) -> Result<Self> {
        let (throttle_tx, throttle_rx) = mpsc::channel(EVENT_BUFFER);
        let core = Arc::new(DeviceCore {
            name: settings.name.clone(),
            node: settings.node_id.clone(),
            tags: TagRepository::new(client.clone(), settings.node_id.clone()),
            client: client.clone(),
            cloud: cloud.clone(),
            format: settings.format,
            policy: settings.rate_control.map(|rc| rc.policy),
            state: Mutex::new(DeviceState {
                desired: DesiredConfig::default(),
                counters: ProductionCounters::default(),
                errors: ErrorMonitor::default(),
                window: settings.rate_control.map(|rc| ProductionWindow::new(rc.window)),
            }),
            throttle: throttle_tx,
        });
        let scheduler = Arc::new(TelemetryScheduler::new(
            settings.name.clone(),
            core.clone(),
            settings.default_interval,
        ));

        let notifications = client
            .subscribe(&Tag::DeviceError.node_path(&settings.node_id))
            .await?;
        let inbound = cloud.attach().await?;

        core.sync_twin(&scheduler).await;

        let (errors_tx, errors_rx) = mpsc::channel(EVENT_BUFFER);
        let monitor = forward_error_notifications(settings.name.clone(), notifications, errors_tx);

        let connection = client.connection_state();
        let connected = *connection.borrow() == ConnectionState::Connected;
        let dispatcher = tokio::spawn(run_dispatcher(
            core.clone(),
            scheduler.clone(),
            inbound,
            errors_rx,
            throttle_rx,
            connection,
        ));

        if connected {
            scheduler.start().await;
        } else {
            tracing::warn!(device = %settings.name, "Endpoint not connected, telemetry waits for reconnect");
        }

        tracing::info!(device = %settings.name, node = %settings.node_id, "Device started");

        Ok(Self {
            core,
            scheduler,
            monitor,
            dispatcher,
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn node(&self) -> &str {
        &self.core.node
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.scheduler.interval()
    }

    /// Currently applied desired configuration.
    pub async fn desired(&self) -> DesiredConfig {
        self.core.state.lock().await.desired.clone()
    }

    /// Last error flags seen by the monitor.
    pub async fn last_errors(&self) -> DeviceErrors {
        self.core.state.lock().await.errors.last()
    }

    /// Tear the device down: stop telemetry, detach from inbound cloud
    /// traffic, drop the protocol subscription, then close the cloud channel.
    pub async fn shutdown(mut self) {
        self.scheduler.shutdown();

        self.dispatcher.abort();
        let _ = (&mut self.dispatcher).await;

        self.monitor.abort();
        let _ = (&mut self.monitor).await;

        self.core.cloud.close().await;

        tracing::info!(device = %self.core.name, "Device stopped");
    }
}

impl Drop for DeviceFacade {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        self.dispatcher.abort();
        self.monitor.abort();
    }
}
