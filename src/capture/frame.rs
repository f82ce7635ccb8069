use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One plane of a camera frame
#[derive(Debug, Clone)]
pub struct Plane {
    /// Immutable plane data - can be shared across threads without copying
    pub data: Bytes,
    /// Bytes between the starts of two consecutive rows
    pub row_stride: usize,
    /// Bytes between two consecutive samples of a row
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Bytes, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }
}

/// Camera frame. Moved, never copied: consumers see it through a `FrameGuard`.
#[derive(Debug)]
pub struct Frame {
    pub planes: Vec<Plane>,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub orientation: Orientation,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl Frame {
    pub fn new(planes: Vec<Plane>, meta: FrameMetadata) -> Self {
        Self {
            planes,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn orientation(&self) -> Orientation {
        self.meta.orientation
    }

    /// Image size once the orientation is applied
    pub fn upright_size(&self) -> (u32, u32) {
        if self.meta.orientation.is_transposed() {
            (self.meta.height, self.meta.width)
        } else {
            (self.meta.width, self.meta.height)
        }
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba32,
    Gray8,
    Yuyv4,
    Mjpeg,
    Nv12,
    /// Three-plane 4:2:0, chroma layout given by the plane pixel stride
    Yuv420,
}

impl PixelFormat {
    /// Number of planes a frame of this format carries
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            PixelFormat::Yuv420 => 3,
            _ => 1,
        }
    }
}

/// Clockwise rotation to apply to a frame to get it upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    pub fn degrees(self) -> u32 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 90,
            Orientation::Deg180 => 180,
            Orientation::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Orientation::Deg0),
            90 => Some(Orientation::Deg90),
            180 => Some(Orientation::Deg180),
            270 => Some(Orientation::Deg270),
            _ => None,
        }
    }

    /// Width and height swap places after rotation
    pub fn is_transposed(self) -> bool {
        matches!(self, Orientation::Deg90 | Orientation::Deg270)
    }
}

impl TryFrom<u32> for Orientation {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        Orientation::from_degrees(degrees)
            .ok_or_else(|| format!("orientation must be 0, 90, 180 or 270, got {degrees}"))
    }
}

impl From<Orientation> for u32 {
    fn from(orientation: Orientation) -> Self {
        orientation.degrees()
    }
}
