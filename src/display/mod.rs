//! Preview surfaces: show the newest preview image with the overlay on top

pub mod headless;
#[cfg(feature = "sdl-display")]
pub mod sdl;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::consumer::PreviewImage;
use crate::error::DisplayError;
use crate::overlay::view::ResultOverlay;

pub use headless::HeadlessPreview;
#[cfg(feature = "sdl-display")]
pub use sdl::Sdl2Display;

const FRAME_WAIT: Duration = Duration::from_millis(50);

/// Something that can put a preview in front of a user
pub trait PreviewSurface {
    /// Show `preview` with the current overlay snapshot drawn over it
    fn present(&mut self, preview: &PreviewImage, overlay: &ResultOverlay) -> Result<(), DisplayError>;

    /// Handle window events. Returns false once the user asked to quit.
    fn pump(&mut self) -> bool {
        true
    }
}

/// Present previews until `stop` is set, the surface quits, or the publisher
/// goes away. Returns the number of frames shown.
pub fn run_surface(
    surface: &mut impl PreviewSurface,
    previews: &flume::Receiver<PreviewImage>,
    overlay: &ResultOverlay,
    stop: &AtomicBool,
) -> Result<u64, DisplayError> {
    let mut shown = 0u64;
    while !stop.load(Ordering::Acquire) {
        if !surface.pump() {
            info!("preview surface closed");
            break;
        }
        match previews.recv_timeout(FRAME_WAIT) {
            Ok(preview) => {
                surface.present(&preview, overlay)?;
                shown += 1;
                metrics::histogram!("argus_preview_latency_ms")
                    .record(preview.captured.elapsed().as_secs_f64() * 1000.0);
            }
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => {
                debug!("preview publisher gone");
                break;
            }
        }
    }
    Ok(shown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::decode::RgbImage;
    use crate::consumer::preview_channel;
    use std::time::Instant;

    struct Counting {
        presented: Vec<u64>,
        quit_after: usize,
    }

    impl PreviewSurface for Counting {
        fn present(&mut self, preview: &PreviewImage, _: &ResultOverlay) -> Result<(), DisplayError> {
            self.presented.push(preview.sequence);
            Ok(())
        }

        fn pump(&mut self) -> bool {
            self.presented.len() < self.quit_after
        }
    }

    fn preview(sequence: u64) -> PreviewImage {
        PreviewImage {
            image: RgbImage {
                width: 1,
                height: 1,
                data: vec![0; 3],
            },
            sequence,
            captured: Instant::now(),
        }
    }

    #[test]
    fn stops_when_publisher_is_gone() {
        let (publisher, previews) = preview_channel();
        assert!(publisher.publish(preview(7)));
        drop(publisher);

        let mut surface = Counting {
            presented: Vec::new(),
            quit_after: usize::MAX,
        };
        let shown = run_surface(&mut surface, &previews, &ResultOverlay::default(), &AtomicBool::new(false)).unwrap();
        assert_eq!(shown, 1);
        assert_eq!(surface.presented, [7]);
    }

    #[test]
    fn quit_from_the_surface_ends_the_loop() {
        let (publisher, previews) = preview_channel();
        let mut surface = Counting {
            presented: Vec::new(),
            quit_after: 1,
        };
        assert!(publisher.publish(preview(1)));
        let shown = run_surface(&mut surface, &previews, &ResultOverlay::default(), &AtomicBool::new(false)).unwrap();
        assert_eq!(shown, 1);
    }

    #[test]
    fn stop_flag_is_honoured() {
        let (_publisher, previews) = preview_channel();
        let mut surface = Counting {
            presented: Vec::new(),
            quit_after: usize::MAX,
        };
        let shown = run_surface(&mut surface, &previews, &ResultOverlay::default(), &AtomicBool::new(true)).unwrap();
        assert_eq!(shown, 0);
    }
}
