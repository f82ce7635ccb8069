pub mod capture;
pub mod consumer;
pub mod display;
pub mod engine;
pub mod error;
pub mod overlay;
pub mod pipeline;

use std::path::{Path, PathBuf};
use std::time::Duration;

use capture::frame::{Orientation, PixelFormat};
use engine::EngineConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use error::{ConfigError, Error, Result};

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
    pub engine: EngineConfig,
    pub replay: ReplayConfig,
    pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera to open instead of the first back-facing one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    pub preferred_width: u32,
    pub preferred_height: u32,
    pub format: PixelFormat,
    /// Depth of each output stream's buffer pool
    pub max_images: usize,
    pub lock_timeout_ms: u64,
    pub close_retries: u32,
    pub display_rotation: Orientation,
    pub landscape: bool,
}

impl CaptureConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_id: None,
            preferred_width: 1280,
            preferred_height: 720,
            format: PixelFormat::Yuv420,
            max_images: 3,
            lock_timeout_ms: 2500,
            close_retries: 3,
            display_rotation: Orientation::Deg0,
            landscape: true,
        }
    }
}

/// Where each consumer runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Convert previews on the capture context instead of the drawing task
    pub drawing_inline: bool,
    /// Recognize on the capture context instead of the inference task
    pub inference_inline: bool,
    pub pin_threads: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Argus".into(),
        }
    }
}

/// Recorded recognition result the demo recognizer answers with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub fps: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self { fps: 30 }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` if any, then `ARGUS_*`
    /// environment overrides (`ARGUS_CAPTURE__MAX_IMAGES=4`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }
        let loaded: Config = builder
            .add_source(
                config::Environment::with_prefix("ARGUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let capture = &self.capture;
        if capture.preferred_width == 0 || capture.preferred_height == 0 {
            return invalid("capture.preferred_width and preferred_height must be non-zero");
        }
        if capture.max_images < 2 {
            return invalid("capture.max_images must be at least 2");
        }
        if capture.lock_timeout_ms == 0 {
            return invalid("capture.lock_timeout_ms must be non-zero");
        }
        if self.display.width == 0 || self.display.height == 0 {
            return invalid("display.width and display.height must be non-zero");
        }
        if self.synthetic.fps == 0 {
            return invalid("synthetic.fps must be non-zero");
        }
        self.engine
            .validate()
            .map_err(|msg| ConfigError::Invalid(format!("engine: {msg}")))
    }
}
