//! Source image to canvas coordinate mapping under letterboxing

use super::canvas::{PointF, RectF};

/// Aspect-preserving fit of an image into a canvas, centered.
///
/// Recomputed on every render pass; canvas and image size both change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformationInfo {
    ratio: f32,
    x_offset: i32,
    y_offset: i32,
    width: i32,
    height: i32,
}

impl TransformationInfo {
    /// `None` when the image has no area
    pub fn new(image_width: u32, image_height: u32, canvas_width: u32, canvas_height: u32) -> Option<Self> {
        if image_width == 0 || image_height == 0 {
            return None;
        }
        let x_ratio = canvas_width as f32 / image_width as f32;
        let y_ratio = canvas_height as f32 / image_height as f32;
        let ratio = x_ratio.min(y_ratio);
        // truncation, not rounding
        let width = (image_width as f32 * ratio) as i32;
        let height = (image_height as f32 * ratio) as i32;
        Some(Self {
            ratio,
            x_offset: (canvas_width as i32 - width) >> 1,
            y_offset: (canvas_height as i32 - height) >> 1,
            width,
            height,
        })
    }

    pub fn transform_x(&self, x: f32) -> f32 {
        x * self.ratio + self.x_offset as f32
    }

    pub fn transform_y(&self, y: f32) -> f32 {
        y * self.ratio + self.y_offset as f32
    }

    pub fn transform(&self, p: PointF) -> PointF {
        PointF::new(self.transform_x(p.x), self.transform_y(p.y))
    }

    pub fn transform_rect(&self, rect: RectF) -> RectF {
        RectF::new(
            self.transform_x(rect.left),
            self.transform_y(rect.top),
            self.transform_x(rect.right),
            self.transform_y(rect.bottom),
        )
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn x_offset(&self) -> i32 {
        self.x_offset
    }

    pub fn y_offset(&self) -> i32 {
        self.y_offset
    }

    /// Width of the fitted image on the canvas
    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }
}

/// Largest size inside `width` x `height` with the `ratio_width:ratio_height`
/// aspect. A zero ratio leaves the size alone.
pub fn measure_with_aspect(width: u32, height: u32, ratio_width: u32, ratio_height: u32) -> (u32, u32) {
    if ratio_width == 0 || ratio_height == 0 {
        return (width, height);
    }
    let (w, h) = (u64::from(width), u64::from(height));
    let (rw, rh) = (u64::from(ratio_width), u64::from(ratio_height));
    if w < h * rw / rh {
        (width, (w * rh / rw) as u32)
    } else {
        ((h * rw / rh) as u32, height)
    }
}
