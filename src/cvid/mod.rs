//! CVID - Binary container for pre-rendered terminal video.
//!
//! A `.cvid` file stores the rendered text of every frame together with the
//! frame rate and the raw bytes of an audio file, so a clip can be replayed
//! without touching the source images again.
//!
//! # File Format
//!
//! All integers are little-endian `int32`, the frame rate is an IEEE-754
//! `f64` and text is little-endian UTF-16.
//!
//! ```text
//! Header:
//!   Magic: "cv" (2 bytes)        absent in v1
//!   Version: u8                  absent in v1
//!   Width: int32                 visible columns per row
//!   Height: int32                rows per frame
//!   Frame rate: f64
//!
//! Audio:
//!   Length: int32
//!   Bytes: Length bytes
//!
//! Frames:
//!   Count: int32
//!   v1/v2: Count blocks of Width * Height UTF-16 units, rows concatenated
//!   v3:    Count entries of [Units: int32][Units UTF-16 units], rows joined by '\n'
//! ```
//!
//! Version 3 keeps color escape sequences intact and is the only version
//! written by [`write`]; v1 and v2 are still readable and can be produced
//! through [`encode_version`] for plain character frames. Grid versions
//! cannot hold frames with a zero width or height, because such frames
//! take no space in the file.

mod format;
mod reader;
mod writer;

pub use format::{CVID_MAGIC, CvidError, CvidHeader, CvidVersion, DECODE_THREADS};
pub use reader::{decode, read};
pub use writer::{encode, encode_version, write};

use crate::stream::{CancelToken, FrameStream, MemoryFrameStream, RenderedFrame, StreamError};

/// In-memory contents of a CVID file.
#[derive(Debug, Clone, PartialEq)]
pub struct CvidContainer {
    /// Version the container was read as, or [`CvidVersion::CURRENT`].
    pub version: CvidVersion,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_rate: f64,
    /// Raw audio file bytes; empty when the clip has no audio.
    pub audio: Vec<u8>,
    pub frames: Vec<RenderedFrame>,
}

impl CvidContainer {
    /// Build a container, taking the frame shape from the first frame.
    pub fn new(frames: Vec<RenderedFrame>, frame_rate: f64, audio: Vec<u8>) -> Self {
        let (width, height) = frames.first().map(|f| f.visible_shape()).unwrap_or((0, 0));
        Self {
            version: CvidVersion::CURRENT,
            frame_width: width as u32,
            frame_height: height as u32,
            frame_rate,
            audio,
            frames,
        }
    }

    /// Snapshot a stream by converting everything it holds.
    ///
    /// The conversion cap is lifted and the worker started, then every frame
    /// is drained in order. The stream is empty afterwards.
    pub fn from_stream<S>(
        stream: &S,
        frame_rate: f64,
        audio: Vec<u8>,
        cancel: &CancelToken,
    ) -> Result<Self, StreamError>
    where
        S: FrameStream + ?Sized,
    {
        stream.safely_process_all();
        stream.run();
        let mut frames = stream.get_all_remaining(cancel)?;
        // Surfaces a failure that stopped the stream after `frames`.
        while let Some(frame) = stream.try_get()? {
            frames.push(frame);
        }
        Ok(Self::new(frames, frame_rate, audio))
    }

    /// Turn the stored frames back into a stream ready for playback.
    ///
    /// Returns the stream together with the frame rate and audio bytes.
    pub fn into_stream(self) -> (MemoryFrameStream, f64, Vec<u8>) {
        (
            MemoryFrameStream::from(self.frames),
            self.frame_rate,
            self.audio,
        )
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn has_audio(&self) -> bool {
        !self.audio.is_empty()
    }
}
