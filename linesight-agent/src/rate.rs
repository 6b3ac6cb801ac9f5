//! Quality-ratio production rate throttle.

use std::time::Duration;

use tokio::time::Instant;

/// Rate step used when none is configured.
pub const DEFAULT_STEP: u8 = 10;

/// Good-ratio threshold (percent) used when none is configured.
pub const DEFAULT_THRESHOLD: f64 = 90.0;

/// Outcome of one throttle evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub current_rate: u8,
    /// Good ratio in percent; `None` when nothing was produced.
    pub ratio: Option<f64>,
    pub new_rate: u8,
}

impl RateDecision {
    pub fn lowers_rate(&self) -> bool {
        self.new_rate < self.current_rate
    }
}

/// Throttle parameters. The controller only ever lowers the rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePolicy {
    pub step: u8,
    pub threshold: f64,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl RatePolicy {
    pub fn decide(&self, current_rate: u8, total_good: u64, total_bad: u64) -> RateDecision {
        let unchanged = |ratio| RateDecision {
            current_rate,
            ratio,
            new_rate: current_rate,
        };

        let total = total_good.saturating_add(total_bad);
        if total == 0 {
            return unchanged(None);
        }
        let ratio = total_good as f64 / total as f64 * 100.0;

        if current_rate == 0 || ratio >= self.threshold {
            return unchanged(Some(ratio));
        }

        RateDecision {
            current_rate,
            ratio: Some(ratio),
            new_rate: current_rate.saturating_sub(self.step),
        }
    }
}

/// [`RatePolicy::decide`] with the default step and threshold.
///
/// # Example
/// ```
/// use linesight_agent::rate::decide;
///
/// assert_eq!(decide(50, 85, 15), 40);
/// assert_eq!(decide(50, 95, 5), 50);
/// ```
pub fn decide(current_rate: u8, total_good: u64, total_bad: u64) -> u8 {
    RatePolicy::default()
        .decide(current_rate, total_good, total_bad)
        .new_rate
}

/// Accumulates per-sample production deltas over a fixed window.
#[derive(Debug, Clone)]
pub struct ProductionWindow {
    length: Duration,
    started: Instant,
    good: u64,
    bad: u64,
}

impl ProductionWindow {
    pub fn new(length: Duration) -> Self {
        Self {
            length,
            started: Instant::now(),
            good: 0,
            bad: 0,
        }
    }

    /// Add one sample's deltas. Returns the window totals `(good, bad)` and
    /// opens a new window once `length` has elapsed.
    pub fn record(&mut self, good: u64, bad: u64) -> Option<(u64, u64)> {
        self.good = self.good.saturating_add(good);
        self.bad = self.bad.saturating_add(bad);

        if self.started.elapsed() < self.length {
            return None;
        }

        let totals = (self.good, self.bad);
        self.started = Instant::now();
        self.good = 0;
        self.bad = 0;
        Some(totals)
    }
}
