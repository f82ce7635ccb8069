//! Drawing surface abstraction and a recording implementation
//!
//! The overlay renders against `Canvas`. `DisplayList` records the calls so a
//! frame's overlay can be inspected, replayed onto a window, or just counted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Rotate around `pivot` by `angle` radians
    pub fn rotated(self, pivot: PointF, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        let (dx, dy) = (self.x - pivot.x, self.y - pivot.y);
        Self::new(pivot.x + dx * cos - dy * sin, pivot.y + dx * sin + dy * cos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectF {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RectF {
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// Corners clockwise from top-left
    pub fn corners(&self) -> [PointF; 4] {
        [
            PointF::new(self.left, self.top),
            PointF::new(self.right, self.top),
            PointF::new(self.right, self.bottom),
            PointF::new(self.left, self.bottom),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Font {
    Regular,
    Bold,
    /// Magnetic ink font for E-13B lines
    E13b,
    /// Magnetic ink font for CMC-7 lines
    Cmc7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaintStyle {
    Fill,
    Stroke,
    FillAndStroke,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Paint {
    pub color: Color,
    pub style: PaintStyle,
    pub stroke_width: f32,
    /// On/off lengths of a dashed stroke
    pub dash: Option<[f32; 2]>,
    pub text_size: f32,
    pub font: Font,
}

impl Paint {
    pub fn fill(color: Color) -> Self {
        Self {
            color,
            style: PaintStyle::FillAndStroke,
            stroke_width: 0.0,
            dash: None,
            text_size: 0.0,
            font: Font::Regular,
        }
    }

    pub fn stroke(color: Color, width: f32) -> Self {
        Self {
            style: PaintStyle::Stroke,
            stroke_width: width,
            ..Self::fill(color)
        }
    }

    pub fn text(color: Color, size: f32, font: Font) -> Self {
        Self {
            text_size: size,
            font,
            ..Self::fill(color)
        }
    }

    pub fn with_stroke_width(mut self, width: f32) -> Self {
        self.stroke_width = width;
        self
    }

    pub fn with_dash(mut self, on: f32, off: f32) -> Self {
        self.dash = Some([on, off]);
        self
    }

    pub fn with_font(mut self, font: Font) -> Self {
        self.font = font;
        self
    }
}

/// Fixed-advance text measurement.
///
/// Surfaces without a real shaper size labels with this; glyph widths are a
/// constant fraction of the text size, per font.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub regular_advance: f32,
    pub bold_advance: f32,
    pub micr_advance: f32,
}

impl Default for FontMetrics {
    fn default() -> Self {
        Self {
            regular_advance: 0.55,
            bold_advance: 0.6,
            micr_advance: 0.7,
        }
    }
}

impl FontMetrics {
    /// Bounds of `text` with its baseline at y = 0
    pub fn text_bounds(&self, text: &str, paint: &Paint) -> RectF {
        let advance = match paint.font {
            Font::Regular => self.regular_advance,
            Font::Bold => self.bold_advance,
            Font::E13b | Font::Cmc7 => self.micr_advance,
        };
        let width = (text.chars().count() as f32 * paint.text_size * advance).ceil();
        RectF::new(0.0, -paint.text_size.ceil(), width, 0.0)
    }
}

pub trait Canvas {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn text_bounds(&self, text: &str, paint: &Paint) -> RectF;

    fn draw_rect(&mut self, rect: RectF, paint: &Paint);

    /// Closed polygon through `points`
    fn draw_polygon(&mut self, points: &[PointF], paint: &Paint);

    /// Text with its baseline starting at `origin`, turned by `angle` radians
    fn draw_text(&mut self, text: &str, origin: PointF, angle: f32, paint: &Paint);
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Rect {
        rect: RectF,
        paint: Paint,
    },
    Polygon {
        points: Vec<PointF>,
        paint: Paint,
    },
    Text {
        text: String,
        origin: PointF,
        angle: f32,
        paint: Paint,
    },
}

/// Canvas that records what was drawn
#[derive(Debug, Clone)]
pub struct DisplayList {
    width: u32,
    height: u32,
    metrics: FontMetrics,
    ops: Vec<DrawOp>,
}

impl DisplayList {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_metrics(width, height, FontMetrics::default())
    }

    pub fn with_metrics(width: u32, height: u32, metrics: FontMetrics) -> Self {
        Self {
            width,
            height,
            metrics,
            ops: Vec::new(),
        }
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<DrawOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Every text drawn, with the font it was drawn in
    pub fn texts(&self) -> impl Iterator<Item = (&str, Font)> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, paint, .. } => Some((text.as_str(), paint.font)),
            _ => None,
        })
    }

    pub fn polygons(&self) -> impl Iterator<Item = &[PointF]> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Polygon { points, .. } => Some(points.as_slice()),
            _ => None,
        })
    }

    pub fn rects(&self) -> impl Iterator<Item = (&RectF, &Paint)> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Rect { rect, paint } => Some((rect, paint)),
            _ => None,
        })
    }

    /// Replay onto another canvas
    pub fn replay(&self, canvas: &mut impl Canvas) {
        for op in &self.ops {
            match op {
                DrawOp::Rect { rect, paint } => canvas.draw_rect(*rect, paint),
                DrawOp::Polygon { points, paint } => canvas.draw_polygon(points, paint),
                DrawOp::Text {
                    text,
                    origin,
                    angle,
                    paint,
                } => canvas.draw_text(text, *origin, *angle, paint),
            }
        }
    }
}

impl Canvas for DisplayList {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn text_bounds(&self, text: &str, paint: &Paint) -> RectF {
        self.metrics.text_bounds(text, paint)
    }

    fn draw_rect(&mut self, rect: RectF, paint: &Paint) {
        self.ops.push(DrawOp::Rect {
            rect,
            paint: *paint,
        });
    }

    fn draw_polygon(&mut self, points: &[PointF], paint: &Paint) {
        self.ops.push(DrawOp::Polygon {
            points: points.to_vec(),
            paint: *paint,
        });
    }

    fn draw_text(&mut self, text: &str, origin: PointF, angle: f32, paint: &Paint) {
        self.ops.push(DrawOp::Text {
            text: text.to_string(),
            origin,
            angle,
            paint: *paint,
        });
    }
}
