//! termvid - Terminal video playback from pre-rendered text frames.
//!
//! Frames are converted from images into ANSI truecolor text on a bounded
//! thread pool, handed to a playback scheduler that keeps the target frame
//! rate by dropping frames when it falls behind, and optionally persisted
//! in the CVID container format for later replay.
//!
//! # Architecture
//!
//! - `stream`: the [`FrameStream`] trait with a converting and an in-memory implementation
//! - `convert`: image to half-block text conversion
//! - `playback`: frame pacing, terminal output, audio and statistics
//! - `cvid`: binary container encode/decode
//! - `schema`: player configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use termvid::{
//!     convert::HalfBlockConverter,
//!     playback::{PlaybackConfig, Scheduler, TerminalSink},
//!     stream::{ConvFrameStream, FrameStream},
//! };
//!
//! let stream = ConvFrameStream::new(HalfBlockConverter::new()).unwrap();
//! stream.add_and_run(vec!["frames/image1.png".into(), "frames/image2.png".into()]);
//!
//! let scheduler = Scheduler::new(PlaybackConfig::new(30.0)).unwrap();
//! let stats = scheduler.play(&stream, &mut TerminalSink::stdout()).unwrap();
//! println!("Dropped {:.1}% of frames", stats.dropped_percent());
//! ```

pub mod convert;
pub mod cvid;
pub mod playback;
pub mod schema;
pub mod stream;

// Re-export commonly used types
pub use cvid::{CvidContainer, CvidError, CvidVersion};
pub use playback::{PlaybackConfig, RunningStats, Scheduler};
pub use schema::PlayerConfig;
pub use stream::{CancelToken, ConvFrameStream, FrameStream, MemoryFrameStream, RenderedFrame};
