//! Surface without a window: renders the overlay into a display list

use tracing::debug;

use super::PreviewSurface;
use crate::consumer::PreviewImage;
use crate::error::DisplayError;
use crate::overlay::canvas::{Canvas, DisplayList};
use crate::overlay::view::ResultOverlay;

pub struct HeadlessPreview {
    width: u32,
    height: u32,
    presented: u64,
    last: Option<DisplayList>,
}

impl HeadlessPreview {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            presented: 0,
            last: None,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Overlay drawn with the most recent preview
    pub fn last_overlay(&self) -> Option<&DisplayList> {
        self.last.as_ref()
    }
}

impl PreviewSurface for HeadlessPreview {
    fn present(&mut self, preview: &PreviewImage, overlay: &ResultOverlay) -> Result<(), DisplayError> {
        let image = &preview.image;
        if image.data.len() != image.width as usize * image.height as usize * 3 {
            return Err(DisplayError::BadImage {
                width: image.width,
                height: image.height,
                len: image.data.len(),
            });
        }

        let (width, height) = overlay.measure(self.width, self.height);
        let mut list = self.last.take().unwrap_or_else(|| DisplayList::new(width, height));
        if (list.width(), list.height()) != (width, height) {
            list = DisplayList::new(width, height);
        }
        list.clear();
        overlay.render(&mut list);

        self.presented += 1;
        debug!(sequence = preview.sequence, ops = list.ops().len(), "preview presented");
        self.last = Some(list);
        Ok(())
    }
}
