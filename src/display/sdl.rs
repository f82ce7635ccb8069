//! SDL2 preview window
//!
//! Streams each preview into an RGB24 texture, letterboxed into the area the
//! overlay measures, and draws the overlay outlines on top.

use sdl2::event::Event;
use sdl2::pixels::{Color as SdlColor, PixelFormatEnum};
use sdl2::rect::{Point, Rect};
use sdl2::render::{BlendMode, Canvas as SdlCanvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::{EventPump, Sdl};
use tracing::{info, trace};

use super::PreviewSurface;
use crate::consumer::PreviewImage;
use crate::error::DisplayError;
use crate::overlay::canvas::{Canvas, Color, FontMetrics, Paint, PaintStyle, PointF, RectF};
use crate::overlay::transform::TransformationInfo;
use crate::overlay::view::ResultOverlay;

fn sdl_err(err: impl ToString) -> DisplayError {
    DisplayError::Backend(err.to_string())
}

/// SDL2 window showing the preview and its overlay
pub struct Sdl2Display {
    _context: Sdl,
    canvas: SdlCanvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    metrics: FontMetrics,
}

impl Sdl2Display {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self, DisplayError> {
        let context = sdl2::init().map_err(sdl_err)?;
        let video = context.video().map_err(sdl_err)?;
        let window = video
            .window(title, width, height)
            .position_centered()
            .resizable()
            .build()
            .map_err(sdl_err)?;

        let mut canvas = window.into_canvas().present_vsync().build().map_err(sdl_err)?;
        canvas.set_blend_mode(BlendMode::Blend);
        let texture_creator = canvas.texture_creator();
        let event_pump = context.event_pump().map_err(sdl_err)?;
        info!(width, height, "preview window open");

        Ok(Self {
            _context: context,
            canvas,
            texture_creator,
            event_pump,
            metrics: FontMetrics::default(),
        })
    }
}

impl PreviewSurface for Sdl2Display {
    fn present(&mut self, preview: &PreviewImage, overlay: &ResultOverlay) -> Result<(), DisplayError> {
        let image = &preview.image;
        let pitch = image.width as usize * 3;
        if image.data.len() != pitch * image.height as usize {
            return Err(DisplayError::BadImage {
                width: image.width,
                height: image.height,
                len: image.data.len(),
            });
        }

        let (window_width, window_height) = self.canvas.output_size().map_err(sdl_err)?;
        let (width, height) = overlay.measure(window_width, window_height);
        let origin = (
            (window_width.saturating_sub(width) / 2) as i32,
            (window_height.saturating_sub(height) / 2) as i32,
        );

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, image.width, image.height)
            .map_err(sdl_err)?;
        texture.update(None, &image.data, pitch).map_err(sdl_err)?;

        self.canvas.set_draw_color(SdlColor::RGB(0, 0, 0));
        self.canvas.clear();
        if let Some(fit) = TransformationInfo::new(image.width, image.height, width, height) {
            let target = Rect::new(
                origin.0 + fit.x_offset(),
                origin.1 + fit.y_offset(),
                fit.width().max(1) as u32,
                fit.height().max(1) as u32,
            );
            self.canvas.copy(&texture, None, Some(target)).map_err(sdl_err)?;
        }

        let mut layer = OverlayLayer {
            canvas: &mut self.canvas,
            origin,
            width,
            height,
            metrics: self.metrics,
            error: None,
        };
        overlay.render(&mut layer);
        if let Some(err) = layer.error {
            return Err(DisplayError::Backend(err));
        }

        self.canvas.present();
        Ok(())
    }

    fn pump(&mut self) -> bool {
        for event in self.event_pump.poll_iter() {
            if let Event::Quit { .. } = event {
                info!("Quit event received");
                return false;
            }
        }
        true
    }
}

/// Overlay drawing onto the window, shifted to the overlay's area
struct OverlayLayer<'a> {
    canvas: &'a mut SdlCanvas<Window>,
    origin: (i32, i32),
    width: u32,
    height: u32,
    metrics: FontMetrics,
    error: Option<String>,
}

impl OverlayLayer<'_> {
    fn point(&self, p: PointF) -> Point {
        Point::new(self.origin.0 + p.x.round() as i32, self.origin.1 + p.y.round() as i32)
    }

    fn color(&mut self, color: Color) {
        self.canvas.set_draw_color(SdlColor::RGBA(color.r, color.g, color.b, color.a));
    }

    fn record(&mut self, result: Result<(), String>) {
        if let Err(err) = result {
            self.error.get_or_insert(err);
        }
    }

    fn outline(&mut self, points: &[PointF]) {
        let mut path: Vec<Point> = points.iter().map(|&p| self.point(p)).collect();
        if let Some(&first) = path.first() {
            path.push(first);
        }
        let drawn = self.canvas.draw_lines(path.as_slice());
        self.record(drawn);
    }
}

impl Canvas for OverlayLayer<'_> {
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
        if rect.is_empty() {
            return;
        }
        self.color(paint.color);
        let top_left = self.point(PointF::new(rect.left, rect.top));
        let target = Rect::new(
            top_left.x(),
            top_left.y(),
            rect.width().round().max(1.0) as u32,
            rect.height().round().max(1.0) as u32,
        );
        let drawn = match paint.style {
            PaintStyle::Stroke => self.canvas.draw_rect(target),
            PaintStyle::Fill | PaintStyle::FillAndStroke => self.canvas.fill_rect(target),
        };
        self.record(drawn);
    }

    fn draw_polygon(&mut self, points: &[PointF], paint: &Paint) {
        self.color(paint.color);
        self.outline(points);
    }

    fn draw_text(&mut self, text: &str, origin: PointF, angle: f32, paint: &Paint) {
        // TODO: rasterize glyphs through sdl2's ttf module once the MICR fonts are bundled
        trace!(text, "text drawn as its bounding box");
        let bounds = self.metrics.text_bounds(text, paint);
        let corners = RectF::new(
            origin.x + bounds.left,
            origin.y + bounds.top,
            origin.x + bounds.right,
            origin.y + bounds.bottom,
        )
        .corners()
        .map(|p| p.rotated(origin, angle));
        self.color(paint.color);
        self.outline(&corners);
    }
}
