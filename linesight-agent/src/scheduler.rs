//! Adaptive-interval telemetry sampling.
//!
//! Each device owns one [`TelemetryScheduler`]. The scheduler runs a single
//! long-lived task that sleeps for the current interval, runs one tick, and
//! only then arms the next sleep, so ticks of one device never overlap.
//! Start, stop and interval changes are published through a `watch` channel
//! and take effect immediately, even in the middle of a sleep.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use linesight_common::TelemetryMessage;

use crate::error::ConfigParseError;
use crate::tags::{ProductionStatus, TagSnapshot};
use crate::twin::interval_from_secs;

/// Externally visible scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Result of one tick, as reported by the [`TickHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A sample was produced and handed off.
    Sent,
    /// The tick was skipped (non-connectivity read error).
    Skipped,
    /// The endpoint is unreachable; the scheduler stops itself.
    Disconnected,
}

/// Work performed by the scheduler on behalf of a device.
#[async_trait]
pub trait TickHandler: Send + Sync + 'static {
    async fn tick(&self) -> TickOutcome;

    /// Send frequency from the device's desired configuration, in seconds.
    async fn desired_interval(&self) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TimerState {
    running: bool,
    /// Last accepted interval.
    interval: Option<Duration>,
}

impl TimerState {
    fn period(&self) -> Option<Duration> {
        self.interval.filter(|_| self.running)
    }
}

struct Shared {
    device: String,
    timer: watch::Sender<TimerState>,
    /// Bumped by every `start` request, including no-op ones.
    starts: AtomicU64,
}

impl Shared {
    fn stop(&self) -> bool {
        self.timer.send_if_modified(|state| {
            let was_running = state.running;
            state.running = false;
            was_running
        })
    }

    /// Stop after a failed tick unless a start was requested while the tick
    /// ran. The check runs under the watch lock, so a concurrent `start`
    /// either cancels this stop or re-arms right after it.
    fn stop_unless_restarted(&self, epoch: u64) -> bool {
        self.timer.send_if_modified(|state| {
            if self.starts.load(Ordering::SeqCst) != epoch {
                return false;
            }
            let was_running = state.running;
            state.running = false;
            was_running
        })
    }
}

/// Periodic sampler for one device.
pub struct TelemetryScheduler {
    shared: Arc<Shared>,
    handler: Arc<dyn TickHandler>,
    default_interval: Duration,
    task: JoinHandle<()>,
}

impl TelemetryScheduler {
    /// Create a stopped scheduler. Must be called inside a Tokio runtime.
    pub fn new(
        device: impl Into<String>,
        handler: Arc<dyn TickHandler>,
        default_interval: Duration,
    ) -> Self {
        let (timer, rx) = watch::channel(TimerState {
            running: false,
            interval: None,
        });
        let shared = Arc::new(Shared {
            device: device.into(),
            timer,
            starts: AtomicU64::new(0),
        });
        let task = tokio::spawn(run_timer(shared.clone(), handler.clone(), rx));

        Self {
            shared,
            handler,
            default_interval,
            task,
        }
    }

    /// Arm the timer. No-op when already running.
    ///
    /// Without a cached interval, the desired send frequency is used, or the
    /// default when the device has none.
    pub async fn start(&self) {
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        let interval = match self.interval() {
            Some(interval) => interval,
            None => self
                .handler
                .desired_interval()
                .await
                .and_then(|secs| interval_from_secs(secs).ok())
                .unwrap_or(self.default_interval),
        };

        let started = self.shared.timer.send_if_modified(|state| {
            if state.running {
                return false;
            }
            state.running = true;
            state.interval.get_or_insert(interval);
            true
        });

        if started {
            tracing::info!(
                device = %self.shared.device,
                interval_secs = self.interval().unwrap_or(interval).as_secs_f64(),
                "Telemetry started"
            );
        } else {
            tracing::debug!(device = %self.shared.device, "Telemetry already running");
        }
    }

    /// Cancel the timer. No-op when already stopped.
    pub fn stop(&self) {
        if self.shared.stop() {
            tracing::info!(device = %self.shared.device, "Telemetry stopped");
        }
    }

    /// Change the interval. Values not above two seconds, or too large for a
    /// [`Duration`], are rejected and the previous interval is kept. A running
    /// timer is re-armed immediately.
    pub fn set_interval(&self, secs: f64) -> Result<Duration, ConfigParseError> {
        let interval = interval_from_secs(secs).inspect_err(|e| {
            tracing::warn!(
                device = %self.shared.device,
                interval_secs = secs,
                error = %e,
                "Rejected send interval"
            );
        })?;

        self.shared.timer.send_modify(|state| state.interval = Some(interval));

        tracing::info!(
            device = %self.shared.device,
            interval_secs = secs,
            "Send interval updated"
        );
        Ok(interval)
    }

    pub fn state(&self) -> SchedulerState {
        if self.shared.timer.borrow().running {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// The cached interval, if one was ever accepted.
    pub fn interval(&self) -> Option<Duration> {
        self.shared.timer.borrow().interval
    }

    /// Stop and tear down the timer task.
    pub fn shutdown(&self) {
        self.stop();
        self.task.abort();
    }
}

impl Drop for TelemetryScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_timer(
    shared: Arc<Shared>,
    handler: Arc<dyn TickHandler>,
    mut rx: watch::Receiver<TimerState>,
) {
    loop {
        let state = *rx.borrow_and_update();
        let Some(period) = state.period() else {
            if rx.changed().await.is_err() {
                return;
            }
            continue;
        };

        tokio::select! {
            _ = tokio::time::sleep(period) => {
                let epoch = shared.starts.load(Ordering::SeqCst);
                if handler.tick().await == TickOutcome::Disconnected
                    && shared.stop_unless_restarted(epoch)
                {
                    tracing::error!(
                        device = %shared.device,
                        "Connection lost, telemetry suspended"
                    );
                }
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// Last-seen value of one cumulative counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterBaseline {
    last: u64,
}

impl CounterBaseline {
    /// Delta since the previous reading. A counter that went backwards was
    /// reset, so the whole new value counts.
    pub fn advance(&mut self, counter: u64) -> u64 {
        let delta = if counter >= self.last {
            counter - self.last
        } else {
            counter
        };
        self.last = counter;
        delta
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}

/// Good/bad baselines of one device.
#[derive(Debug, Clone, Default)]
pub struct ProductionCounters {
    good: CounterBaseline,
    bad: CounterBaseline,
}

impl ProductionCounters {
    /// Turn a snapshot into a sample and advance both baselines.
    pub fn sample(&mut self, snapshot: &TagSnapshot) -> TelemetrySample {
        TelemetrySample {
            production_status: snapshot.production_status,
            workorder_id: snapshot.workorder_id.clone(),
            delta_good: self.good.advance(snapshot.good_count),
            delta_bad: self.bad.advance(snapshot.bad_count),
            total_good: snapshot.good_count,
            total_bad: snapshot.bad_count,
            temperature: snapshot.temperature,
            timestamp: Utc::now(),
        }
    }
}

/// One tick's worth of telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub production_status: ProductionStatus,
    pub workorder_id: String,
    pub delta_good: u64,
    pub delta_bad: u64,
    pub total_good: u64,
    pub total_bad: u64,
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn to_message(&self) -> TelemetryMessage {
        let wide = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        TelemetryMessage {
            production_status: self.production_status.code(),
            workorder_id: self.workorder_id.clone(),
            good_count: wide(self.delta_good),
            bad_count: wide(self.delta_bad),
            total_good_count: wide(self.total_good),
            total_bad_count: wide(self.total_bad),
            temperature: self.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::oneshot;

    use crate::tags::DeviceErrors;

    #[derive(Default)]
    struct ScriptedHandler {
        ticks: AtomicUsize,
        outcomes: Mutex<VecDeque<TickOutcome>>,
        desired: Option<f64>,
        /// Holds the first tick open until released.
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl ScriptedHandler {
        fn ticks(&self) -> usize {
            self.ticks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TickHandler for ScriptedHandler {
        async fn tick(&self) -> TickOutcome {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TickOutcome::Sent)
        }

        async fn desired_interval(&self) -> Option<f64> {
            self.desired
        }
    }

    fn scheduler(handler: &Arc<ScriptedHandler>) -> TelemetryScheduler {
        TelemetryScheduler::new("line-1", handler.clone(), Duration::from_secs(300))
    }

    async fn wait(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_uses_desired_interval() {
        let handler = Arc::new(ScriptedHandler {
            desired: Some(30.0),
            ..Default::default()
        });
        let scheduler = scheduler(&handler);

        scheduler.start().await;
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(scheduler.interval(), Some(Duration::from_secs(30)));

        wait(95.0).await;
        assert_eq!(handler.ticks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_falls_back_to_default() {
        let handler = Arc::new(ScriptedHandler {
            desired: Some(1.0),
            ..Default::default()
        });
        let scheduler = scheduler(&handler);

        scheduler.start().await;
        assert_eq!(scheduler.interval(), Some(Duration::from_secs(300)));

        wait(299.0).await;
        assert_eq!(handler.ticks(), 0);
        wait(2.0).await;
        assert_eq!(handler.ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_floor() {
        let handler = Arc::new(ScriptedHandler::default());
        let scheduler = scheduler(&handler);
        scheduler.set_interval(20.0).unwrap();
        scheduler.start().await;

        assert_eq!(
            scheduler.set_interval(1.5),
            Err(ConfigParseError::IntervalTooShort(1.5))
        );
        assert!(scheduler.set_interval(2.0).is_err());
        assert_eq!(
            scheduler.set_interval(3.6e19),
            Err(ConfigParseError::IntervalTooLong(3.6e19))
        );
        assert!(scheduler.set_interval(f64::INFINITY).is_err());
        assert_eq!(scheduler.interval(), Some(Duration::from_secs(20)));

        wait(45.0).await;
        assert_eq!(handler.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_rearms_running_timer() {
        let handler = Arc::new(ScriptedHandler::default());
        let scheduler = scheduler(&handler);
        scheduler.start().await;

        // Halfway through the default 300s sleep.
        wait(150.0).await;
        assert_eq!(scheduler.set_interval(10.0), Ok(Duration::from_secs(10)));

        wait(10.5).await;
        assert_eq!(handler.ticks(), 1);
        wait(10.0).await;
        assert_eq!(handler.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let handler = Arc::new(ScriptedHandler::default());
        let scheduler = scheduler(&handler);
        scheduler.set_interval(10.0).unwrap();

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        scheduler.start().await;
        wait(5.0).await;
        scheduler.start().await;
        scheduler.start().await;

        // The repeated starts neither reset nor duplicate the timer.
        wait(6.0).await;
        assert_eq!(handler.ticks(), 1);
        wait(10.0).await;
        assert_eq!(handler.ticks(), 2);

        scheduler.stop();
        scheduler.stop();
        wait(60.0).await;
        assert_eq!(handler.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_tick_stops_scheduler() {
        let handler = Arc::new(ScriptedHandler::default());
        handler
            .outcomes
            .lock()
            .unwrap()
            .extend([TickOutcome::Skipped, TickOutcome::Disconnected]);
        let scheduler = scheduler(&handler);
        scheduler.set_interval(10.0).unwrap();
        scheduler.start().await;

        wait(15.0).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        wait(10.0).await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        wait(100.0).await;
        assert_eq!(handler.ticks(), 2);

        // Reconnect resumes at the cached interval.
        scheduler.start().await;
        wait(10.5).await;
        assert_eq!(handler.ticks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_during_failed_tick_keeps_running() {
        let (release, gate) = oneshot::channel();
        let handler = Arc::new(ScriptedHandler {
            gate: Mutex::new(Some(gate)),
            ..Default::default()
        });
        handler
            .outcomes
            .lock()
            .unwrap()
            .push_back(TickOutcome::Disconnected);
        let scheduler = scheduler(&handler);
        scheduler.set_interval(10.0).unwrap();
        scheduler.start().await;

        // The link comes back while the failing tick is still in flight.
        wait(10.5).await;
        assert_eq!(handler.ticks(), 1);
        scheduler.start().await;
        release.send(()).unwrap();
        wait(0.1).await;

        assert_eq!(scheduler.state(), SchedulerState::Running);
        wait(10.0).await;
        assert_eq!(handler.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_desired_interval_falls_back_to_default() {
        let handler = Arc::new(ScriptedHandler {
            desired: Some(3.6e19),
            ..Default::default()
        });
        let scheduler = scheduler(&handler);

        scheduler.start().await;
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(scheduler.interval(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_counter_baseline_deltas() {
        let mut baseline = CounterBaseline::default();
        let readings = [0, 5, 5, 12, 40];
        let deltas: Vec<u64> = readings.iter().map(|c| baseline.advance(*c)).collect();

        assert_eq!(deltas, vec![0, 5, 0, 7, 28]);
        assert_eq!(deltas.iter().sum::<u64>(), 40);
    }

    #[test]
    fn test_counter_reset_rebases() {
        let mut baseline = CounterBaseline::default();
        baseline.advance(100);
        assert_eq!(baseline.advance(7), 7);
        assert_eq!(baseline.last(), 7);
        assert_eq!(baseline.advance(10), 3);
    }

    #[test]
    fn test_sample_to_message() {
        let mut counters = ProductionCounters::default();
        let snapshot = TagSnapshot {
            production_status: ProductionStatus::Running,
            workorder_id: "a5b1".into(),
            good_count: 50,
            bad_count: 2,
            temperature: 70.25,
            errors: DeviceErrors::NONE,
        };
        counters.sample(&snapshot);

        let next = TagSnapshot {
            good_count: 58,
            bad_count: 3,
            ..snapshot
        };
        let message = counters.sample(&next).to_message();

        assert_eq!(message.production_status, 1);
        assert_eq!(message.good_count, 8);
        assert_eq!(message.bad_count, 1);
        assert_eq!(message.total_good_count, 58);
        assert_eq!(message.total_bad_count, 3);
    }
}
