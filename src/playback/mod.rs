//! Playback - Timed delivery of rendered frames to the terminal.
//!
//! The [`Scheduler`] consumes any [`FrameStream`](crate::stream::FrameStream),
//! renders through a [`FrameSink`] and keeps the target cadence by carrying
//! time debt between ticks. Audio is started separately through an
//! [`AudioPlayer`] and is not synchronised beyond starting at the same time.

mod audio;
mod scheduler;
mod sink;
mod stats;

pub use audio::{AudioPlayer, CommandAudio};
pub use scheduler::{
    Clock, FrameSkip, PlaybackClock, PlaybackConfig, PlaybackError, Scheduler, SystemClock, Tick,
};
pub use sink::{FrameSink, TerminalSink};
pub use stats::RunningStats;
