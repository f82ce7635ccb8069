//! Recognition engine boundary
//!
//! The engine itself lives outside this crate. `Recognizer` is what it has
//! to provide; `Engine` wraps one so calls are serialized and nothing runs
//! before `init` or after `deinit`.

pub mod replay;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::decode::to_rgb;
use crate::capture::frame::{Frame, FrameMetadata, Orientation, PixelFormat, Plane};
use crate::error::{EngineError, PayloadError};
use crate::overlay::canvas::{PointF, RectF};
use crate::overlay::zone::{RecognitionZone, ZoneClass, ZoneField};

pub use replay::ReplayRecognizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    Verbose,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmenterAccuracy {
    VeryHigh,
    #[default]
    High,
    Medium,
    Low,
    VeryLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
}

/// MICR line formats to look for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MicrFormat {
    #[serde(rename = "e13b")]
    E13b,
    #[serde(rename = "cmc7")]
    Cmc7,
    #[default]
    #[serde(rename = "e13b+cmc7")]
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreType {
    #[default]
    Min,
    Mean,
    Median,
    Max,
    MinMax,
}

/// Engine configuration, serialized to the JSON the engine reads at `init`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub debug_level: DebugLevel,
    pub debug_write_input_image_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_internal_data_path: Option<String>,

    /// -1 lets the engine pick
    pub num_threads: i32,
    pub gpgpu_enabled: bool,
    pub gpgpu_workload_balancing_enabled: bool,

    pub segmenter_accuracy: SegmenterAccuracy,
    pub interpolation: Interpolation,
    pub format: MicrFormat,
    /// left, right, top, bottom; all zero disables it
    pub roi: [f32; 4],
    pub min_score: f32,
    pub score_type: ScoreType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backpropagation_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ielcd_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_token_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_token_data: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug_level: DebugLevel::Info,
            debug_write_input_image_enabled: false,
            debug_internal_data_path: None,
            num_threads: -1,
            gpgpu_enabled: true,
            gpgpu_workload_balancing_enabled: cfg!(any(target_arch = "aarch64", target_arch = "arm")),
            segmenter_accuracy: SegmenterAccuracy::High,
            interpolation: Interpolation::Bilinear,
            format: MicrFormat::Both,
            roi: [0.0; 4],
            min_score: 0.3,
            score_type: ScoreType::Min,
            assets_folder: None,
            backpropagation_enabled: None,
            ielcd_enabled: None,
            license_token_file: None,
            license_token_data: None,
        }
    }
}

impl EngineConfig {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_score > 0.0 && self.min_score <= 1.0) {
            return Err(format!("engine.min_score must be in (0, 1], got {}", self.min_score));
        }
        if self.num_threads == 0 || self.num_threads < -1 {
            return Err(format!("engine.num_threads must be -1 or positive, got {}", self.num_threads));
        }
        let [left, right, top, bottom] = self.roi;
        if self.roi.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err("engine.roi values must be finite and non-negative".into());
        }
        if self.roi != [0.0; 4] && (left > right || top > bottom) {
            return Err(format!("engine.roi is inverted: {:?}", self.roi));
        }
        Ok(())
    }

    /// Region of interest in image pixels, if one is set
    pub fn detect_roi(&self) -> Option<RectF> {
        let [left, right, top, bottom] = self.roi;
        Some(RectF::new(left, top, right, bottom)).filter(|roi| !roi.is_empty())
    }
}

/// Pixel layouts the engine accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageType {
    Y,
    Rgb24,
    Bgr24,
    Rgba32,
    Bgra32,
    /// Three planes; chroma may be interleaved through its pixel stride
    Yuv420p,
    Nv12,
    Nv21,
}

impl ImageType {
    /// Layout the engine sees for `format`. YUYV and MJPEG are converted to
    /// packed RGB first.
    pub fn for_format(format: PixelFormat) -> Self {
        Self::native(format).unwrap_or(ImageType::Rgb24)
    }

    /// Layout the engine takes a `format` frame in as captured
    pub fn native(format: PixelFormat) -> Option<Self> {
        match format {
            PixelFormat::Gray8 => Some(ImageType::Y),
            PixelFormat::Rgb24 => Some(ImageType::Rgb24),
            PixelFormat::Bgr24 => Some(ImageType::Bgr24),
            PixelFormat::Rgba32 => Some(ImageType::Rgba32),
            PixelFormat::Nv12 => Some(ImageType::Nv12),
            PixelFormat::Yuv420 => Some(ImageType::Yuv420p),
            PixelFormat::Yuyv4 | PixelFormat::Mjpeg => None,
        }
    }
}

/// Borrowed image handed to `process`
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    pub image_type: ImageType,
    pub width: u32,
    pub height: u32,
    /// Data with row and pixel strides, one entry per plane
    pub planes: &'a [Plane],
    pub orientation: Orientation,
}

impl<'a> ImageInput<'a> {
    pub fn from_frame(frame: &'a Frame) -> Result<Self, EngineError> {
        let image_type = ImageType::native(frame.format())
            .ok_or_else(|| EngineError::UnsupportedFrame(format!("{:?} frames", frame.format())))?;
        if frame.planes.len() < frame.format().plane_count() {
            return Err(EngineError::UnsupportedFrame(format!(
                "{:?} frame with {} planes",
                frame.format(),
                frame.planes.len()
            )));
        }
        Ok(Self {
            image_type,
            width: frame.width(),
            height: frame.height(),
            planes: &frame.planes,
            orientation: frame.orientation(),
        })
    }
}

/// A frame as the engine will see it: borrowed when the engine takes the
/// captured layout, converted to packed RGB otherwise
#[derive(Debug)]
pub enum EngineFrame<'a> {
    Captured(&'a Frame),
    Converted(Frame),
}

impl<'a> EngineFrame<'a> {
    pub fn prepare(frame: &'a Frame) -> Result<Self, EngineError> {
        if ImageType::native(frame.format()).is_some() {
            return Ok(EngineFrame::Captured(frame));
        }
        let image = to_rgb(frame)?;
        let meta = FrameMetadata {
            width: image.width,
            height: image.height,
            format: PixelFormat::Rgb24,
            ..FrameMetadata::clone(&frame.meta)
        };
        let row_stride = image.width as usize * 3;
        Ok(EngineFrame::Converted(Frame {
            planes: vec![Plane::new(Bytes::from(image.data), row_stride, 3)],
            meta: Arc::new(meta),
            timestamp: frame.timestamp,
        }))
    }

    pub fn frame(&self) -> &Frame {
        match self {
            EngineFrame::Captured(frame) => frame,
            EngineFrame::Converted(frame) => frame,
        }
    }

    pub fn input(&self) -> Result<ImageInput<'_>, EngineError> {
        ImageInput::from_frame(self.frame())
    }
}

/// Outcome of an engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineResult {
    pub code: i32,
    pub phrase: String,
    pub num_zones: usize,
    pub json: Option<String>,
}

impl EngineResult {
    pub fn ok(num_zones: usize, json: Option<String>) -> Self {
        Self {
            code: 0,
            phrase: "OK".into(),
            num_zones,
            json,
        }
    }

    pub fn failure(code: i32, phrase: impl Into<String>) -> Self {
        Self {
            code,
            phrase: phrase.into(),
            num_zones: 0,
            json: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    pub fn ensure_ok(self) -> Result<Self, EngineError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(EngineError::Failed {
                code: self.code,
                phrase: self.phrase,
            })
        }
    }

    fn payload(&self) -> Result<Option<Payload>, PayloadError> {
        match &self.json {
            Some(json) if self.is_ok() => Ok(Some(serde_json::from_str(json)?)),
            _ => Ok(None),
        }
    }

    /// Zones of the payload; none for failed or empty results
    pub fn zones(&self) -> Result<Vec<RecognitionZone>, PayloadError> {
        if self.num_zones == 0 {
            return Ok(Vec::new());
        }
        let Some(payload) = self.payload()? else {
            return Ok(Vec::new());
        };
        payload
            .zones
            .unwrap_or_default()
            .into_iter()
            .map(RawZone::into_zone)
            .collect()
    }

    /// Frame identifier the engine assigned, 0 when absent
    pub fn frame_id(&self) -> Result<u64, PayloadError> {
        Ok(self.payload()?.map_or(0, |payload| payload.frame_id))
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    frame_id: u64,
    #[serde(default)]
    zones: Option<Vec<RawZone>>,
}

#[derive(Debug, Deserialize)]
struct RawZone {
    klass: i32,
    skew: f32,
    text: String,
    #[serde(default)]
    description: String,
    /// recognition, detection; percentages
    confidences: Vec<f32>,
    #[serde(rename = "warpedBox")]
    warped_box: Vec<f32>,
    #[serde(default)]
    fields: Vec<BTreeMap<String, serde_json::Value>>,
}

impl RawZone {
    fn into_zone(self) -> Result<RecognitionZone, PayloadError> {
        let class = ZoneClass::try_from(self.klass)?;
        let [recognition, detection] = <[f32; 2]>::try_from(self.confidences.as_slice())
            .map_err(|_| PayloadError::Confidences(self.confidences.len()))?;
        for confidence in [recognition, detection] {
            if !(0.0..=100.0).contains(&confidence) {
                return Err(PayloadError::ConfidenceRange(confidence));
            }
        }
        let corners = <[f32; 8]>::try_from(self.warped_box.as_slice())
            .map_err(|_| PayloadError::WarpedBox(self.warped_box.len()))?;
        let warped_box = [0, 2, 4, 6].map(|i| PointF::new(corners[i], corners[i + 1]));

        let fields = self
            .fields
            .into_iter()
            .flatten()
            .map(|(name, value)| ZoneField {
                name,
                value: match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
            })
            .collect();

        Ok(RecognitionZone {
            class,
            skew: self.skew,
            text: self.text,
            description: self.description,
            detection_confidence: detection / 100.0,
            recognition_confidence: recognition / 100.0,
            warped_box,
            fields,
        })
    }
}

/// What an engine implementation provides.
///
/// `&mut self` on every call: an engine is never entered twice at once.
pub trait Recognizer: Send {
    fn init(&mut self, config: &EngineConfig) -> EngineResult;

    /// Prime caches for `image_type` before the first timed call
    fn warm_up(&mut self, _image_type: ImageType) -> EngineResult {
        EngineResult::ok(0, None)
    }

    fn process(&mut self, image: &ImageInput<'_>) -> EngineResult;

    fn deinit(&mut self) -> EngineResult;
}

impl<R: Recognizer + ?Sized> Recognizer for Box<R> {
    fn init(&mut self, config: &EngineConfig) -> EngineResult {
        (**self).init(config)
    }

    fn warm_up(&mut self, image_type: ImageType) -> EngineResult {
        (**self).warm_up(image_type)
    }

    fn process(&mut self, image: &ImageInput<'_>) -> EngineResult {
        (**self).process(image)
    }

    fn deinit(&mut self) -> EngineResult {
        (**self).deinit()
    }
}

/// Initialized recognizer, shared between contexts
pub struct Engine<R> {
    slot: Mutex<Option<R>>,
}

impl<R: Recognizer> Engine<R> {
    pub fn init(mut recognizer: R, config: &EngineConfig) -> Result<Self, EngineError> {
        let json = config.to_json().map_err(PayloadError::from)?;
        debug!(%json, "engine configuration");
        recognizer.init(config).ensure_ok()?;
        info!("recognition engine initialized");
        Ok(Self {
            slot: Mutex::new(Some(recognizer)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<R>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    pub fn warm_up(&self, image_type: ImageType) -> Result<(), EngineError> {
        let mut slot = self.lock();
        let recognizer = slot.as_mut().ok_or(EngineError::NotInitialized)?;
        recognizer.warm_up(image_type).ensure_ok()?;
        Ok(())
    }

    pub fn process(&self, image: &ImageInput<'_>) -> Result<EngineResult, EngineError> {
        let mut slot = self.lock();
        let recognizer = slot.as_mut().ok_or(EngineError::NotInitialized)?;
        recognizer.process(image).ensure_ok()
    }

    /// Release the engine; later calls fail with `NotInitialized`
    pub fn deinit(&self) -> Result<(), EngineError> {
        let Some(mut recognizer) = self.lock().take() else {
            warn!("engine already deinitialized");
            return Ok(());
        };
        recognizer.deinit().ensure_ok()?;
        info!("recognition engine released");
        Ok(())
    }

    /// Run `f` against the recognizer, if still initialized
    pub fn with_recognizer<T>(&self, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        self.lock().as_mut().map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_CMC7: &str = r#"{"code":200,"duration":332,"frame_id":7,"phrase":"OK","zones":[{"confidences":[90.15003204345703,100],"description":"CMC-7","fields":[{"Bank":"001"},{"Agency":"3541"}],"klass":2,"skew":-0.05488986259415382,"text":"H00135412H0162807425I814001083915F","warpedBox":[71,446,484,446,484,487,71,487]},{"confidences":[90.15355682373047,100],"description":"CMC-7","klass":2,"skew":-0.04946456860159136,"text":"H03345339H0180021545I701010000550F","warpedBox":[-1,188,422,188,422,232,-1,232]}]}"#;

    #[test]
    fn config_uses_engine_names() {
        let json: serde_json::Value =
            serde_json::from_str(&EngineConfig::default().to_json().unwrap()).unwrap();
        assert_eq!(json["debug_level"], "info");
        assert_eq!(json["segmenter_accuracy"], "high");
        assert_eq!(json["format"], "e13b+cmc7");
        assert_eq!(json["score_type"], "min");
        assert_eq!(json["num_threads"], -1);
        assert!(json.get("assets_folder").is_none());

        let config = EngineConfig {
            segmenter_accuracy: SegmenterAccuracy::VeryHigh,
            score_type: ScoreType::MinMax,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert!(json.contains(r#""segmenter_accuracy":"veryhigh""#));
        assert!(json.contains(r#""score_type":"minmax""#));
    }

    #[test]
    fn config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        let bad = EngineConfig {
            min_score: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let inverted = EngineConfig {
            roi: [100.0, 10.0, 0.0, 50.0],
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn roi_maps_to_rect() {
        assert_eq!(EngineConfig::default().detect_roi(), None);
        let config = EngineConfig {
            roi: [10.0, 110.0, 20.0, 80.0],
            ..Default::default()
        };
        assert_eq!(config.detect_roi(), Some(RectF::new(10.0, 20.0, 110.0, 80.0)));
    }

    #[test]
    fn payload_zones_are_normalized() {
        let result = EngineResult::ok(2, Some(TWO_CMC7.into()));
        let zones = result.zones().unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].class, ZoneClass::Cmc7);
        assert_eq!(zones[0].detection_confidence, 1.0);
        assert!((zones[0].recognition_confidence - 0.9015).abs() < 1e-4);
        assert_eq!(zones[0].warped_box[2], PointF::new(484.0, 487.0));
        assert_eq!(zones[0].fields[1].name, "Agency");
        assert_eq!(zones[1].warped_box[0], PointF::new(-1.0, 188.0));
        assert_eq!(result.frame_id().unwrap(), 7);
    }

    #[test]
    fn empty_and_failed_results_have_no_zones() {
        assert!(EngineResult::ok(0, Some(TWO_CMC7.into())).zones().unwrap().is_empty());
        assert!(EngineResult::ok(1, None).zones().unwrap().is_empty());
        let failed = EngineResult::failure(3, "boom");
        assert!(failed.zones().unwrap().is_empty());
        assert!(matches!(
            failed.ensure_ok(),
            Err(EngineError::Failed { code: 3, .. })
        ));
    }

    #[test]
    fn malformed_payloads_are_typed_errors() {
        let short_box = r#"{"zones":[{"klass":1,"skew":0,"text":"1","confidences":[50,50],"warpedBox":[1,2,3]}]}"#;
        assert!(matches!(
            EngineResult::ok(1, Some(short_box.into())).zones(),
            Err(PayloadError::WarpedBox(3))
        ));
        let one_score = r#"{"zones":[{"klass":1,"skew":0,"text":"1","confidences":[50],"warpedBox":[0,0,0,0,0,0,0,0]}]}"#;
        assert!(matches!(
            EngineResult::ok(1, Some(one_score.into())).zones(),
            Err(PayloadError::Confidences(1))
        ));
        let klass = r#"{"zones":[{"klass":9,"skew":0,"text":"1","confidences":[50,50],"warpedBox":[0,0,0,0,0,0,0,0]}]}"#;
        assert!(matches!(
            EngineResult::ok(1, Some(klass.into())).zones(),
            Err(PayloadError::UnknownClass(9))
        ));
        let range = r#"{"zones":[{"klass":1,"skew":0,"text":"1","confidences":[150,50],"warpedBox":[0,0,0,0,0,0,0,0]}]}"#;
        assert!(matches!(
            EngineResult::ok(1, Some(range.into())).zones(),
            Err(PayloadError::ConfidenceRange(_))
        ));
        assert!(matches!(
            EngineResult::ok(1, Some("{".into())).zones(),
            Err(PayloadError::Json(_))
        ));
    }

    fn frame(format: PixelFormat, width: u32, height: u32, plane: Plane) -> Frame {
        Frame::new(
            vec![plane],
            FrameMetadata {
                sequence: 9,
                width,
                height,
                format,
                orientation: Orientation::Deg90,
                device_timestamp: None,
            },
        )
    }

    #[test]
    fn packed_422_is_converted_to_rgb_for_the_engine() {
        assert_eq!(ImageType::for_format(PixelFormat::Yuyv4), ImageType::Rgb24);
        assert_eq!(ImageType::for_format(PixelFormat::Mjpeg), ImageType::Rgb24);
        assert_eq!(ImageType::for_format(PixelFormat::Nv12), ImageType::Nv12);

        let yuyv = frame(
            PixelFormat::Yuyv4,
            2,
            1,
            Plane::new(Bytes::from_static(&[50, 128, 60, 128]), 4, 2),
        );
        let prepared = EngineFrame::prepare(&yuyv).unwrap();
        assert!(matches!(prepared, EngineFrame::Converted(_)));
        let input = prepared.input().unwrap();
        assert_eq!(input.image_type, ImageType::Rgb24);
        assert_eq!((input.width, input.height), (2, 1));
        assert_eq!(input.orientation, Orientation::Deg90);
        assert_eq!(input.planes[0].data.as_ref(), [50, 50, 50, 60, 60, 60]);
        assert_eq!(prepared.frame().meta.sequence, 9);
    }

    #[test]
    fn native_layouts_are_borrowed() {
        let gray = frame(PixelFormat::Gray8, 2, 2, Plane::new(Bytes::from_static(&[0; 4]), 2, 1));
        let prepared = EngineFrame::prepare(&gray).unwrap();
        assert!(matches!(prepared, EngineFrame::Captured(_)));
        assert_eq!(prepared.input().unwrap().image_type, ImageType::Y);

        let short = frame(PixelFormat::Yuyv4, 4, 1, Plane::new(Bytes::from_static(&[0; 4]), 4, 2));
        assert!(matches!(EngineFrame::prepare(&short), Err(EngineError::Convert(_))));
    }
}
