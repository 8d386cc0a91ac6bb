/// Stage configuration — playback tuning and host capabilities.
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default characters-per-tick multiplier. Higher is faster; ~10 is about
/// the fastest that still reads as typing.
pub const DEFAULT_SPEED: f32 = 2.0;

/// Delays at or below this many milliseconds run on the next tick instead of
/// going through the timer queue.
pub const DEFAULT_FRAME_THRESHOLD_MS: u64 = 16;

/// Prefix of every persisted choice-group key.
pub const DEFAULT_STORAGE_PREFIX: &str = "narrative-terminal-group-";

/// Query parameter that clears saved progress on load.
pub const RESET_PARAMETER: &str = "reset";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid chunk range: min {min} is greater than max {max}")]
    ChunkRange { min: usize, max: usize },
}

/// Inclusive bounds of the randomly drawn chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub min: usize,
    pub max: usize,
}

impl ChunkRange {
    pub const STANDARD: ChunkRange = ChunkRange { min: 5, max: 30 };
    /// Bigger bites for terse presets.
    pub const TERSE: ChunkRange = ChunkRange { min: 15, max: 60 };
}

impl Default for ChunkRange {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Named chunk presets selectable from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Preset {
    #[default]
    Standard,
    Terse,
}

impl Preset {
    pub fn chunk_range(&self) -> ChunkRange {
        match self {
            Self::Standard => ChunkRange::STANDARD,
            Self::Terse => ChunkRange::TERSE,
        }
    }
}

/// Everything a `Stage` needs besides the document and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Seed for chunk-size randomness.
    #[serde(default)]
    pub seed: u64,
    /// Speed for terminals that do not set their own.
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub preset: Preset,
    /// Explicit range; wins over `preset` when present.
    #[serde(default)]
    pub chunk: Option<ChunkRange>,
    #[serde(default = "default_frame_threshold")]
    pub frame_threshold_ms: u64,
    /// The host asked for reduced motion: every play reveals at once.
    #[serde(default)]
    pub reduced_motion: bool,
    /// The host can report visibility. Without it autoplay terminals play
    /// as soon as they are attached.
    #[serde(default = "default_true")]
    pub visibility_sensing: bool,
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,
    /// Address the stage was loaded from; consulted for the reset parameter.
    #[serde(default)]
    pub location: Option<String>,
}

fn default_speed() -> f32 {
    DEFAULT_SPEED
}

fn default_frame_threshold() -> u64 {
    DEFAULT_FRAME_THRESHOLD_MS
}

fn default_true() -> bool {
    true
}

fn default_storage_prefix() -> String {
    DEFAULT_STORAGE_PREFIX.to_string()
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            speed: DEFAULT_SPEED,
            preset: Preset::Standard,
            chunk: None,
            frame_threshold_ms: DEFAULT_FRAME_THRESHOLD_MS,
            reduced_motion: false,
            visibility_sensing: true,
            storage_prefix: default_storage_prefix(),
            location: None,
        }
    }
}

impl StageConfig {
    pub fn load_from_ron(path: &Path) -> Result<StageConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<StageConfig, ConfigError> {
        let config: StageConfig = ron::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let range = self.chunk_range();
        if range.min > range.max {
            return Err(ConfigError::ChunkRange {
                min: range.min,
                max: range.max,
            });
        }
        Ok(())
    }

    pub fn chunk_range(&self) -> ChunkRange {
        self.chunk.unwrap_or_else(|| self.preset.chunk_range())
    }

    pub fn storage_key(&self, group_id: &str) -> String {
        format!("{}{}", self.storage_prefix, group_id)
    }
}
