//! The two frame consumers: preview drawing and recognition

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::capture::decode::{decode_frame, RgbImage};
use crate::capture::refcount::FrameGuard;
use crate::capture::sizing::Size;
use crate::engine::{Engine, EngineFrame, Recognizer};
use crate::error::{EngineError, Error};
use crate::overlay::view::ResultOverlay;
use crate::overlay::zone::RecognitionZone;
use crate::pipeline::router::FrameConsumer;

/// Upright RGB image ready for a preview surface
#[derive(Debug, Clone)]
pub struct PreviewImage {
    pub image: RgbImage,
    pub sequence: u64,
    pub captured: Instant,
}

/// Sending half of a latest-wins preview mailbox
pub struct PreviewPublisher {
    tx: flume::Sender<PreviewImage>,
    stale: flume::Receiver<PreviewImage>,
}

/// Mailbox holding at most one preview; publishing replaces an unread one
pub fn preview_channel() -> (PreviewPublisher, flume::Receiver<PreviewImage>) {
    let (tx, rx) = flume::bounded(1);
    (
        PreviewPublisher {
            tx,
            stale: rx.clone(),
        },
        rx,
    )
}

impl PreviewPublisher {
    /// Returns false once the surface is gone
    pub fn publish(&self, mut preview: PreviewImage) -> bool {
        // our own `stale` handle is always one of the receivers
        if self.tx.receiver_count() <= 1 {
            return false;
        }
        loop {
            match self.tx.try_send(preview) {
                Ok(()) => return true,
                Err(flume::TrySendError::Full(back)) => {
                    if let Ok(old) = self.stale.try_recv() {
                        trace!(sequence = old.sequence, "unshown preview replaced");
                    }
                    preview = back;
                }
                Err(flume::TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Converts frames for the preview surface
pub struct DrawingConsumer {
    publisher: PreviewPublisher,
    drawn: AtomicU64,
    failures: AtomicU64,
}

impl DrawingConsumer {
    pub fn new(publisher: PreviewPublisher) -> Self {
        Self {
            publisher,
            drawn: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn drawn(&self) -> u64 {
        self.drawn.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn convert(frame: &FrameGuard) -> Result<PreviewImage, Error> {
        let frame = frame.frame()?;
        Ok(PreviewImage {
            image: decode_frame(frame)?,
            sequence: frame.meta.sequence,
            captured: frame.timestamp,
        })
    }
}

impl FrameConsumer for DrawingConsumer {
    fn consume(&self, frame: FrameGuard) {
        let converted = Self::convert(&frame);
        drop(frame);

        match converted {
            Ok(preview) => {
                if self.publisher.publish(preview) {
                    self.drawn.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(%err, "preview conversion failed");
            }
        }
    }
}

/// Runs recognition and publishes results to the overlay
pub struct InferenceConsumer<R> {
    engine: Arc<Engine<R>>,
    overlay: Arc<ResultOverlay>,
    processed: AtomicU64,
    failures: AtomicU64,
}

impl<R: Recognizer> InferenceConsumer<R> {
    pub fn new(engine: Arc<Engine<R>>, overlay: Arc<ResultOverlay>) -> Self {
        Self {
            engine,
            overlay,
            processed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn recognize(&self, frame: &FrameGuard) -> Result<(Vec<RecognitionZone>, Size, Duration), EngineError> {
        let frame = frame.frame()?;
        let prepared = EngineFrame::prepare(frame)?;
        let input = prepared.input()?;
        let started = Instant::now();
        let result = self.engine.process(&input)?;
        let zones = result.zones()?;
        let elapsed = started.elapsed();
        let (width, height) = frame.upright_size();
        debug!(frame_id = result.frame_id().unwrap_or_default(), zones = zones.len(), ?elapsed, "frame recognized");
        Ok((zones, Size::new(width, height), elapsed))
    }
}

impl<R: Recognizer + 'static> FrameConsumer for InferenceConsumer<R> {
    fn consume(&self, frame: FrameGuard) {
        let outcome = self.recognize(&frame);
        drop(frame);

        match outcome {
            Ok((zones, size, elapsed)) => {
                metrics::histogram!("argus_inference_time_ms").record(elapsed.as_secs_f64() * 1000.0);
                self.processed.fetch_add(1, Ordering::Relaxed);
                self.overlay.set_result(zones, size, elapsed);
            }
            Err(err) => {
                metrics::counter!("argus_engine_failures_total").increment(1);
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(%err, "recognition failed, keeping previous result");
            }
        }
    }
}
