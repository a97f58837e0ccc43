//! Configuration types for terminal video playback.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::playback::{CommandAudio, FrameSkip, PlaybackConfig};
use crate::stream::{DEFAULT_BATCH_SIZE, DEFAULT_CONVERSION_THREADS, StreamOptions};

/// External program used to play the audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioCommandConfig {
    /// Executable name or path.
    pub program: String,
    /// Arguments placed before the audio file path.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for AudioCommandConfig {
    fn default() -> Self {
        let audio = CommandAudio::default();
        Self {
            program: audio.program().to_owned(),
            args: audio.args().to_vec(),
        }
    }
}

/// Top-level player configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Maximum consecutive dropped frames (-1 = no cap, 0 = never drop).
    pub frame_skip: i64,
    /// Ask for more conversions when fewer frames than this are ready.
    pub low_water: usize,
    /// Conversions requested each time the ready buffer runs low.
    pub lookahead: usize,
    /// Parallel conversion tasks.
    pub conversion_threads: usize,
    /// Descriptors converted per batch.
    pub batch_size: usize,
    /// Print the running stats overlay below each frame.
    pub debug: bool,
    pub audio_command: AudioCommandConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            frame_skip: -1,
            low_water: 4,
            lookahead: 16,
            conversion_threads: DEFAULT_CONVERSION_THREADS,
            batch_size: DEFAULT_BATCH_SIZE,
            debug: false,
            audio_command: AudioCommandConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PlayerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_skip < -1 {
            return Err(ConfigError::InvalidFrameSkip(self.frame_skip));
        }
        // Either being zero would leave a capped stream idle forever.
        if self.low_water == 0 {
            return Err(ConfigError::InvalidLowWater);
        }
        if self.lookahead == 0 {
            return Err(ConfigError::InvalidLookahead);
        }
        if self.conversion_threads == 0 {
            return Err(ConfigError::InvalidConversionThreads);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.audio_command.program.trim().is_empty() {
            return Err(ConfigError::EmptyAudioCommand);
        }
        Ok(())
    }

    /// Playback parameters for a clip at `frame_rate`.
    pub fn playback(&self, frame_rate: f64) -> Result<PlaybackConfig, ConfigError> {
        let frame_skip = FrameSkip::from_cap(self.frame_skip)
            .map_err(|_| ConfigError::InvalidFrameSkip(self.frame_skip))?;
        Ok(PlaybackConfig {
            frame_rate,
            frame_skip,
            low_water: self.low_water,
            lookahead: self.lookahead,
        })
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            conversion_threads: self.conversion_threads,
            batch_size: self.batch_size,
        }
    }

    pub fn audio_player(&self) -> CommandAudio {
        CommandAudio::new(
            self.audio_command.program.clone(),
            self.audio_command.args.clone(),
        )
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Error reading config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Error parsing config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Frame skip must be -1 (uncapped) or non-negative, got {0}")]
    InvalidFrameSkip(i64),
    #[error("Low-water mark must be non-zero")]
    InvalidLowWater,
    #[error("Lookahead must be non-zero")]
    InvalidLookahead,
    #[error("Conversion thread count must be non-zero")]
    InvalidConversionThreads,
    #[error("Batch size must be non-zero")]
    InvalidBatchSize,
    #[error("Audio command program must not be empty")]
    EmptyAudioCommand,
}
