//! Running playback statistics for the debug overlay.

use std::fmt::Write;
use std::time::Duration;

/// Accumulated time-debt and drop statistics for one playback session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningStats {
    /// Frames rendered.
    pub count: u64,
    /// Mean time debt over rendered frames.
    pub mean: Duration,
    /// Largest time debt carried into a rendered frame.
    pub max: Duration,
    /// Rendered frames that carried nonzero debt.
    pub debted: u64,
    /// Frames discarded without rendering.
    pub dropped: u64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rendered frame that carried `debt`.
    pub fn add(&mut self, debt: Duration) {
        self.max = self.max.max(debt);
        // Incremental mean in nanoseconds.
        let total = self.mean.as_nanos() * self.count as u128 + debt.as_nanos();
        self.count += 1;
        self.mean = duration_from_nanos(total / self.count as u128);
        if !debt.is_zero() {
            self.debted += 1;
        }
    }

    /// Record a frame dropped to catch up.
    pub fn add_dropped(&mut self) {
        self.dropped += 1;
    }

    /// Rendered plus dropped frames.
    pub fn full_count(&self) -> u64 {
        self.count + self.dropped
    }

    /// Percentage of all frames that were dropped.
    pub fn dropped_percent(&self) -> f64 {
        percent(self.dropped, self.full_count())
    }

    /// Percentage of rendered frames that carried debt.
    pub fn debted_percent(&self) -> f64 {
        percent(self.debted, self.count)
    }

    /// Two-line green status block describing the session so far.
    pub fn render(&self, current: Duration) -> String {
        let mut out = String::from("\u{1b}[32;40m");
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "FRAME     | CURR: {} | DROPPED: {} | DROPPED %: {:06.2} | DEBTED: {} | DEBTED %: {:06.2}",
            self.full_count(),
            self.dropped,
            self.dropped_percent(),
            self.debted,
            self.debted_percent()
        );
        let _ = write!(
            out,
            "TIME DEBT | CURR: {:>12}us | MEAN: {:>12}us | MAX: {:>12}us\u{1b}[0m",
            current.as_micros(),
            self.mean.as_micros(),
            self.max.as_micros()
        );
        out
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
