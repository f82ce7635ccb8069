//! Recognition result overlay
//!
//! The inference consumer publishes results; the render path draws them over
//! the preview. Both sides meet on one lock that only guards an `Arc` swap,
//! so drawing always works on a whole snapshot and never holds the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use super::canvas::{Canvas, Color, Font, Paint, PointF, RectF};
use super::transform::{measure_with_aspect, TransformationInfo};
use super::zone::RecognitionZone;
use crate::capture::sizing::Size;

const TEXT_NUMBER_SIZE_DIP: f32 = 12.0;
const TEXT_CONFIDENCE_SIZE_DIP: f32 = 10.0;
const TEXT_PROCESSING_TIME_SIZE_DIP: f32 = 10.0;
const STROKE_WIDTH_DIP: f32 = 3.0;

/// What the overlay shows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayState {
    pub zones: Vec<RecognitionZone>,
    /// Upright size of the image the zones were found in
    pub image_size: Option<Size>,
    pub processing_time: Duration,
    /// Detection region in image pixels
    pub detect_roi: Option<RectF>,
}

/// Paints for each overlay element, sized for a display density
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub text: Paint,
    pub text_background: Paint,
    pub confidence: Paint,
    pub confidence_background: Paint,
    pub border: Paint,
    pub processing_time: Paint,
    pub processing_time_background: Paint,
    pub detect_roi: Paint,
}

impl OverlayStyle {
    /// `density` is pixels per density-independent pixel
    pub fn new(density: f32) -> Self {
        let stroke = STROKE_WIDTH_DIP * density;
        Self {
            text: Paint::text(Color::BLACK, TEXT_NUMBER_SIZE_DIP * density, Font::E13b),
            text_background: Paint::fill(Color::YELLOW).with_stroke_width(stroke),
            confidence: Paint::text(Color::BLUE, TEXT_CONFIDENCE_SIZE_DIP * density, Font::Bold),
            confidence_background: Paint::fill(Color::YELLOW).with_stroke_width(stroke),
            border: Paint::stroke(Color::YELLOW, stroke),
            processing_time: Paint::text(Color::BLACK, TEXT_PROCESSING_TIME_SIZE_DIP * density, Font::Bold),
            processing_time_background: Paint::fill(Color::WHITE).with_stroke_width(stroke),
            detect_roi: Paint::stroke(Color::RED, stroke).with_dash(10.0, 20.0),
        }
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::new(1.0)
    }
}

pub struct ResultOverlay {
    state: Mutex<Arc<OverlayState>>,
    aspect: Mutex<(u32, u32)>,
    style: OverlayStyle,
}

impl ResultOverlay {
    pub fn new(style: OverlayStyle) -> Self {
        Self {
            state: Mutex::new(Arc::new(OverlayState::default())),
            aspect: Mutex::new((0, 0)),
            style,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, Arc<OverlayState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the shown result in one step
    pub fn set_result(&self, zones: Vec<RecognitionZone>, image_size: Size, processing_time: Duration) {
        let mut state = self.lock_state();
        let next = OverlayState {
            zones,
            image_size: Some(image_size),
            processing_time,
            detect_roi: state.detect_roi,
        };
        *state = Arc::new(next);
    }

    pub fn set_detect_roi(&self, roi: Option<RectF>) {
        let mut state = self.lock_state();
        let mut next = OverlayState::clone(&state);
        next.detect_roi = roi;
        *state = Arc::new(next);
    }

    pub fn snapshot(&self) -> Arc<OverlayState> {
        Arc::clone(&self.lock_state())
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn set_aspect_ratio(&self, width: u32, height: u32) {
        *self.aspect.lock().unwrap_or_else(PoisonError::into_inner) = (width, height);
    }

    /// Size the view takes inside `width` x `height`
    pub fn measure(&self, width: u32, height: u32) -> (u32, u32) {
        let (rw, rh) = *self.aspect.lock().unwrap_or_else(PoisonError::into_inner);
        measure_with_aspect(width, height, rw, rh)
    }

    /// Draw the current snapshot
    pub fn render(&self, canvas: &mut impl Canvas) {
        let state = self.snapshot();
        render_state(&state, &self.style, canvas);
    }
}

impl Default for ResultOverlay {
    fn default() -> Self {
        Self::new(OverlayStyle::default())
    }
}

/// Draw `state` onto `canvas`. Nothing is drawn before an image size is known.
pub fn render_state(state: &OverlayState, style: &OverlayStyle, canvas: &mut impl Canvas) {
    let Some(image) = state.image_size else {
        trace!("overlay not initialized yet");
        return;
    };

    // Processing time, top-left, independent of the image placement
    let label = format!("Total processing time: {}", state.processing_time.as_millis());
    let bounds = canvas.text_bounds(&label, &style.processing_time);
    canvas.draw_rect(
        RectF::new(0.0, 0.0, bounds.width(), bounds.height()),
        &style.processing_time_background,
    );
    canvas.draw_text(&label, PointF::new(0.0, bounds.height()), 0.0, &style.processing_time);

    let Some(t) = TransformationInfo::new(image.width, image.height, canvas.width(), canvas.height())
    else {
        return;
    };

    if let Some(roi) = state.detect_roi.filter(|roi| !roi.is_empty()) {
        canvas.draw_rect(t.transform_rect(roi), &style.detect_roi);
    }

    for zone in &state.zones {
        draw_zone(zone, &t, style, canvas);
    }
}

fn draw_zone(zone: &RecognitionZone, t: &TransformationInfo, style: &OverlayStyle, canvas: &mut impl Canvas) {
    let [a, b, c, d] = zone.warped_box.map(|p| t.transform(p));
    canvas.draw_polygon(&[a, b, c, d], &style.border);

    // Decoded text above the first edge
    let text = zone.display_text();
    let text_paint = style.text.with_font(zone.class.font());
    let bounds = canvas.text_bounds(&text, &text_paint);
    let background = RectF::new(a.x, a.y - bounds.height(), a.x + bounds.width(), a.y);
    canvas.draw_rect(background, &style.text_background);
    let run = (b.x.max(a.x + bounds.width()) - a.x, b.y - a.y);
    canvas.draw_text(&text, a, run.1.atan2(run.0), &text_paint);

    // Confidence under the last edge, turned to follow it
    let confidence = format!("{:.2}%", zone.confidence() * 100.0);
    let bounds = canvas.text_bounds(&confidence, &style.confidence);
    let angle = (c.y - d.y).atan2(c.x - d.x);
    let label = RectF::new(d.x, d.y, d.x + bounds.width(), d.y + bounds.height());
    let corners = label.corners().map(|p| p.rotated(d, angle));
    canvas.draw_polygon(&corners, &style.confidence_background);
    let baseline = PointF::new(d.x, d.y + bounds.height()).rotated(d, angle);
    canvas.draw_text(&confidence, baseline, angle, &style.confidence);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::canvas::{DisplayList, DrawOp};
    use crate::overlay::zone::ZoneClass;

    fn zone(class: ZoneClass, text: &str) -> RecognitionZone {
        RecognitionZone {
            class,
            skew: 0.0,
            text: text.into(),
            description: "test".into(),
            detection_confidence: 1.0,
            recognition_confidence: 0.9015,
            warped_box: [
                PointF::new(100.0, 100.0),
                PointF::new(500.0, 100.0),
                PointF::new(500.0, 140.0),
                PointF::new(100.0, 140.0),
            ],
            fields: Vec::new(),
        }
    }

    #[test]
    fn nothing_before_first_result() {
        let overlay = ResultOverlay::default();
        overlay.set_detect_roi(Some(RectF::new(0.0, 0.0, 10.0, 10.0)));
        let mut list = DisplayList::new(640, 360);
        overlay.render(&mut list);
        assert!(list.is_empty());
    }

    #[test]
    fn zone_geometry_follows_the_transform() {
        let overlay = ResultOverlay::default();
        overlay.set_result(
            vec![zone(ZoneClass::E13b, "123")],
            Size::new(1280, 720),
            Duration::from_millis(42),
        );
        let mut list = DisplayList::new(640, 360);
        overlay.render(&mut list);

        let border = list.polygons().next().unwrap();
        assert_eq!(
            border,
            &[
                PointF::new(50.0, 50.0),
                PointF::new(250.0, 50.0),
                PointF::new(250.0, 70.0),
                PointF::new(50.0, 70.0),
            ]
        );
        let texts: Vec<_> = list.texts().map(|(text, _)| text.to_string()).collect();
        assert_eq!(texts, ["Total processing time: 42", "123", "90.15%"]);
    }

    #[test]
    fn confidence_label_turns_with_the_bottom_edge() {
        let overlay = ResultOverlay::default();
        let mut tilted = zone(ZoneClass::E13b, "1");
        // bottom edge D -> C rises at 45 degrees
        tilted.warped_box[2] = PointF::new(140.0, 100.0);
        tilted.warped_box[3] = PointF::new(100.0, 140.0);
        overlay.set_result(vec![tilted], Size::new(640, 360), Duration::ZERO);
        let mut list = DisplayList::new(640, 360);
        overlay.render(&mut list);

        let angle = list
            .ops()
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, angle, .. } if text.ends_with('%') => Some(*angle),
                _ => None,
            })
            .next()
            .unwrap();
        assert!((angle + std::f32::consts::FRAC_PI_4).abs() < 1e-5);
    }

    #[test]
    fn result_keeps_the_roi() {
        let overlay = ResultOverlay::default();
        let roi = RectF::new(10.0, 10.0, 100.0, 50.0);
        overlay.set_detect_roi(Some(roi));
        overlay.set_result(Vec::new(), Size::new(640, 360), Duration::ZERO);
        assert_eq!(overlay.snapshot().detect_roi, Some(roi));
    }

    #[test]
    fn aspect_ratio_drives_measurement() {
        let overlay = ResultOverlay::default();
        assert_eq!(overlay.measure(800, 600), (800, 600));
        overlay.set_aspect_ratio(16, 9);
        assert_eq!(overlay.measure(800, 600), (800, 450));
    }
}
