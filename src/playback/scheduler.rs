//! Playback scheduler - Drift-correcting frame pacing.
//!
//! Each tick pulls one frame from a [`FrameStream`], renders it through a
//! [`FrameSink`] and sleeps for whatever remains of the frame time. Time spent
//! beyond the frame time is carried forward as debt and paid back on later
//! ticks, at most one frame time per tick. When debt exceeds a whole frame the
//! scheduler may drop frames, bounded by the [`FrameSkip`] policy.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use super::{FrameSink, RunningStats};
use crate::stream::{Budget, CancelToken, FrameStream, RenderedFrame, StreamError};

/// Maximum number of consecutive frames the scheduler may drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSkip {
    /// Drop as many frames as needed to catch up.
    Uncapped,
    /// Drop at most this many frames in a row. `Capped(0)` disables dropping.
    Capped(usize),
}

impl FrameSkip {
    /// Parse the signed cap convention: -1 is uncapped, `n >= 0` is capped.
    pub fn from_cap(cap: i64) -> Result<Self, PlaybackError> {
        match cap {
            -1 => Ok(FrameSkip::Uncapped),
            n if n >= 0 => Ok(FrameSkip::Capped(n as usize)),
            n => Err(PlaybackError::InvalidFrameSkip(n)),
        }
    }

    /// Whether another drop is allowed after `skipped` consecutive drops.
    pub fn allows(self, skipped: usize) -> bool {
        match self {
            FrameSkip::Uncapped => true,
            FrameSkip::Capped(cap) => skipped < cap,
        }
    }
}

/// Outcome of one scheduler tick, reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A frame was rendered while carrying `debt`.
    Rendered { debt: Duration },
    /// A frame was discarded to catch up.
    Dropped,
}

/// Source of time for the scheduler.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Errors surfaced by playback.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Frame rate must be finite and positive, got {0}")]
    InvalidFrameRate(f64),

    #[error("Frame skip cap must be -1 or non-negative, got {0}")]
    InvalidFrameSkip(i64),

    #[error("Frame stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Failed to render frame: {0}")]
    Sink(#[from] std::io::Error),
}

/// Playback parameters.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackConfig {
    /// Target frames per second.
    pub frame_rate: f64,
    /// Frame drop policy.
    pub frame_skip: FrameSkip,
    /// Request more conversions when fewer than this many frames are ready.
    pub low_water: usize,
    /// Conversion budget the scheduler keeps outstanding while the ready
    /// buffer is low.
    pub lookahead: usize,
}

impl PlaybackConfig {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_rate,
            frame_skip: FrameSkip::Uncapped,
            low_water: 4,
            lookahead: 16,
        }
    }
}

/// Pacing state carried between ticks.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    /// Fixed duration of one frame.
    pub frame_time: Duration,
    /// How far the schedule is behind.
    pub time_debt: Duration,
    /// Consecutive drops since the last rendered frame.
    pub skip_counter: usize,
}

impl PlaybackClock {
    pub fn new(frame_time: Duration) -> Self {
        Self {
            frame_time,
            time_debt: Duration::ZERO,
            skip_counter: 0,
        }
    }

    /// Decide whether the next frame is dropped, updating debt and counters.
    pub fn should_drop(&mut self, policy: FrameSkip) -> bool {
        if self.time_debt > self.frame_time && policy.allows(self.skip_counter) {
            self.time_debt -= self.frame_time;
            self.skip_counter += 1;
            return true;
        }
        self.skip_counter = 0;
        false
    }

    /// Account for a tick that took `elapsed`, returning how long to sleep.
    ///
    /// At most one frame time is corrected per tick; the rest stays as debt.
    pub fn settle(&mut self, elapsed: Duration) -> Duration {
        let makeup = elapsed + self.time_debt;
        let correction = makeup.min(self.frame_time);
        self.time_debt = makeup.saturating_sub(self.frame_time);
        self.frame_time - correction
    }
}

/// Foreground playback loop.
///
/// Usage:
/// ```ignore
/// let scheduler = Scheduler::new(PlaybackConfig::new(30.0))?;
/// let stats = scheduler.play(&stream, &mut TerminalSink::stdout())?;
/// println!("dropped {:.2}%", stats.dropped_percent());
/// ```
pub struct Scheduler<K: Clock = SystemClock> {
    config: PlaybackConfig,
    frame_time: Duration,
    clock: K,
    cancel: CancelToken,
}

impl Scheduler<SystemClock> {
    pub fn new(config: PlaybackConfig) -> Result<Self, PlaybackError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<K: Clock> Scheduler<K> {
    /// Create a scheduler that reads time from `clock`.
    pub fn with_clock(config: PlaybackConfig, clock: K) -> Result<Self, PlaybackError> {
        let rate = config.frame_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlaybackError::InvalidFrameRate(rate));
        }
        // Rates too small for a Duration, or too large to leave a nonzero frame time.
        let frame_time = Duration::try_from_secs_f64(1.0 / rate)
            .ok()
            .filter(|t| !t.is_zero())
            .ok_or(PlaybackError::InvalidFrameRate(rate))?;
        Ok(Self {
            frame_time,
            config,
            clock,
            cancel: CancelToken::new(),
        })
    }

    /// Stop playback when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Play every frame of `stream` through `sink`.
    pub fn play<S, F>(&self, stream: &S, sink: &mut F) -> Result<RunningStats, PlaybackError>
    where
        S: FrameStream + ?Sized,
        F: FrameSink + ?Sized,
    {
        self.play_with(stream, sink, |_, _| {})
    }

    /// Play every frame of `stream`, reporting each tick to `on_tick`.
    ///
    /// Returns once the stream is drained or the cancel token fires.
    pub fn play_with<S, F, T>(
        &self,
        stream: &S,
        sink: &mut F,
        mut on_tick: T,
    ) -> Result<RunningStats, PlaybackError>
    where
        S: FrameStream + ?Sized,
        F: FrameSink + ?Sized,
        T: FnMut(Tick, &RunningStats),
    {
        let mut pacing = PlaybackClock::new(self.frame_time);
        let mut stats = RunningStats::new();
        // Planned start of the current tick; oversleep shows up as debt.
        let mut deadline = self.clock.now();

        info!(
            "Starting playback: {} frames at {:.3} fps ({:?} per frame, skip {:?})",
            stream.count(),
            self.config.frame_rate,
            self.frame_time,
            self.config.frame_skip
        );

        while stream.count() > 0 {
            if self.cancel.is_cancelled() {
                info!("Playback cancelled");
                break;
            }

            if stream.ready_count() < self.config.low_water {
                self.top_up(stream);
            }

            if pacing.should_drop(self.config.frame_skip) {
                if self.next_frame(stream)?.is_none() {
                    break;
                }
                stats.add_dropped();
                debug!("Dropped frame, debt now {:?}", pacing.time_debt);
                on_tick(Tick::Dropped, &stats);
                continue;
            }

            let Some(frame) = self.next_frame(stream)? else {
                break;
            };
            sink.render(&frame)?;
            drop(frame);

            let debt = pacing.time_debt;
            stats.add(debt);
            on_tick(Tick::Rendered { debt }, &stats);

            let now = self.clock.now();
            let wait = pacing.settle(now.saturating_duration_since(deadline));
            deadline = now + wait;
            if !wait.is_zero() {
                self.clock.sleep(wait);
            }
        }

        info!(
            "Playback finished: {} rendered, {} dropped ({:.2}%)",
            stats.count,
            stats.dropped,
            stats.dropped_percent()
        );
        Ok(stats)
    }

    /// Raise the stream's unspent budget to `lookahead`.
    ///
    /// Budget already granted but not yet converted counts toward the target,
    /// so a slow converter never accumulates more than `lookahead`.
    fn top_up<S>(&self, stream: &S)
    where
        S: FrameStream + ?Sized,
    {
        let pending = match stream.budget() {
            Budget::Unlimited => return,
            Budget::Unset => 0,
            Budget::Limited(n) => n,
        };
        let wanted = self.config.lookahead.saturating_sub(pending);
        if wanted > 0 {
            stream.safely_process_more(wanted);
        }
    }

    /// Fetch the next frame, mapping a cancelled or drained stream to `None`.
    fn next_frame<S>(&self, stream: &S) -> Result<Option<RenderedFrame>, PlaybackError>
    where
        S: FrameStream + ?Sized,
    {
        match stream.get(&self.cancel) {
            Ok(frame) => Ok(Some(frame)),
            Err(StreamError::Cancelled) | Err(StreamError::Exhausted) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
