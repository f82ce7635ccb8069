//! Recognizer that answers every frame with a recorded payload

use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use super::{EngineConfig, EngineResult, ImageInput, ImageType, Recognizer};

const NOT_INITIALIZED: i32 = -1;
const BAD_INPUT: i32 = -2;

pub struct ReplayRecognizer {
    payload: Option<Value>,
    initialized: bool,
    frames: u64,
    warmed_up: Vec<ImageType>,
}

impl ReplayRecognizer {
    /// Replays `payload`, or reports no zones when there is none
    pub fn new(payload: Option<Value>) -> Self {
        Self {
            payload,
            initialized: false,
            frames: 0,
            warmed_up: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(Some(serde_json::from_str(json)?)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let recognizer = Self::from_json(&json)?;
        info!(path = %path.display(), "replaying recorded recognition payload");
        Ok(recognizer)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    pub fn warmed_up(&self) -> &[ImageType] {
        &self.warmed_up
    }
}

impl Recognizer for ReplayRecognizer {
    fn init(&mut self, config: &EngineConfig) -> EngineResult {
        debug!(format = ?config.format, "replay recognizer initialized");
        self.initialized = true;
        EngineResult::ok(0, None)
    }

    fn warm_up(&mut self, image_type: ImageType) -> EngineResult {
        if !self.initialized {
            return EngineResult::failure(NOT_INITIALIZED, "engine not initialized");
        }
        self.warmed_up.push(image_type);
        EngineResult::ok(0, None)
    }

    fn process(&mut self, image: &ImageInput<'_>) -> EngineResult {
        if !self.initialized {
            return EngineResult::failure(NOT_INITIALIZED, "engine not initialized");
        }
        if image.width == 0 || image.height == 0 || image.planes.is_empty() {
            return EngineResult::failure(BAD_INPUT, "empty image");
        }
        self.frames += 1;

        let Some(mut payload) = self.payload.clone() else {
            return EngineResult::ok(0, None);
        };
        let num_zones = payload
            .get("zones")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if let Some(object) = payload.as_object_mut() {
            object.insert("frame_id".into(), Value::from(self.frames));
        }
        EngineResult::ok(num_zones, Some(payload.to_string()))
    }

    fn deinit(&mut self) -> EngineResult {
        self.initialized = false;
        EngineResult::ok(0, None)
    }
}
