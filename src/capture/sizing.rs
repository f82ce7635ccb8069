//! Preview size selection and orientation maths

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::capture::device::{CameraInfo, LensFacing};
use crate::capture::frame::Orientation;

/// Smallest side a preview stream may have
pub const MINIMUM_PREVIEW_SIZE: u32 = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pick the stream size for a `width` x `height` preview.
///
/// An exact match wins. Otherwise the smallest choice whose both sides reach
/// `max(min(width, height), 320)`, and failing that the first choice.
pub fn choose_optimal_size(choices: &[Size], width: u32, height: u32) -> Option<Size> {
    let min_side = width.min(height).max(MINIMUM_PREVIEW_SIZE);
    let desired = Size::new(width, height);

    if choices.contains(&desired) {
        info!(%desired, "exact preview size match found");
        return Some(desired);
    }

    let chosen = choices
        .iter()
        .copied()
        .filter(|size| size.width >= min_side && size.height >= min_side)
        .min_by_key(|size| size.area());

    match chosen {
        Some(size) => {
            info!(%desired, chosen = %size, "preview size chosen");
            Some(size)
        }
        None => {
            let fallback = choices.first().copied();
            if fallback.is_some() {
                error!(%desired, min_side, "no preview size big enough, using the first one");
            }
            fallback
        }
    }
}

/// Rotation the consumers must apply to the sensor image, given how the
/// display is rotated and how the sensor is mounted
pub fn frame_orientation(display_rotation: Orientation, sensor_orientation: u32) -> Orientation {
    let display = match display_rotation {
        Orientation::Deg0 => 90,
        Orientation::Deg90 => 0,
        Orientation::Deg180 => 270,
        Orientation::Deg270 => 180,
    };
    let degrees = (display + sensor_orientation % 360 + 270) % 360;
    // sensor_orientation is always a multiple of 90 on real hardware
    Orientation::from_degrees(degrees - degrees % 90).unwrap_or_default()
}

/// First camera that is not front-facing and has outputs, or `preferred`
pub fn select_camera<'a>(cameras: &'a [CameraInfo], preferred: Option<&str>) -> Option<&'a CameraInfo> {
    if let Some(id) = preferred {
        return cameras.iter().find(|camera| camera.id == id);
    }
    cameras
        .iter()
        .find(|camera| camera.facing != LensFacing::Front && !camera.output_sizes.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes() -> Vec<Size> {
        vec![
            Size::new(1920, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
            Size::new(320, 240),
        ]
    }

    #[test]
    fn exact_match_wins() {
        assert_eq!(
            choose_optimal_size(&sizes(), 640, 480),
            Some(Size::new(640, 480))
        );
    }

    #[test]
    fn smallest_big_enough_otherwise() {
        // min side 600: only 1920x1080 and 1280x720 qualify
        assert_eq!(
            choose_optimal_size(&sizes(), 800, 600),
            Some(Size::new(1280, 720))
        );
        // tiny request is raised to the 320 floor
        assert_eq!(
            choose_optimal_size(&sizes(), 100, 100),
            Some(Size::new(640, 480))
        );
    }

    #[test]
    fn falls_back_to_first_choice() {
        assert_eq!(
            choose_optimal_size(&sizes(), 4000, 3000),
            Some(Size::new(1920, 1080))
        );
        assert_eq!(choose_optimal_size(&[], 640, 480), None);
    }

    #[test]
    fn orientation_table() {
        assert_eq!(frame_orientation(Orientation::Deg0, 90), Orientation::Deg90);
        assert_eq!(frame_orientation(Orientation::Deg90, 90), Orientation::Deg0);
        assert_eq!(frame_orientation(Orientation::Deg0, 270), Orientation::Deg270);
        assert_eq!(frame_orientation(Orientation::Deg270, 0), Orientation::Deg90);
    }

    #[test]
    fn back_camera_is_preferred() {
        let cameras = vec![
            CameraInfo {
                id: "1".into(),
                facing: LensFacing::Front,
                sensor_orientation: 270,
                output_sizes: sizes(),
            },
            CameraInfo {
                id: "0".into(),
                facing: LensFacing::Back,
                sensor_orientation: 90,
                output_sizes: sizes(),
            },
        ];
        assert_eq!(select_camera(&cameras, None).unwrap().id, "0");
        assert_eq!(select_camera(&cameras, Some("1")).unwrap().id, "1");
        assert!(select_camera(&cameras, Some("7")).is_none());
    }
}
