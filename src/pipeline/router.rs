//! Dual-sink dispatch of camera buffers
//!
//! The router sits on the capture context. On every buffer-available event it
//! works out which of the two output streams fired, takes that stream's
//! newest buffer and hands it to the matching sink. The two streams never
//! share a buffer and never wait on each other.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use tracing::{debug, trace, warn};

use crate::capture::refcount::FrameGuard;
use crate::pipeline::pool::{PoolStats, StreamId, StreamPool, StreamRole};

/// Does something with a frame, then lets it go
pub trait FrameConsumer: Send + Sync + 'static {
    fn consume(&self, frame: FrameGuard);
}

impl<F> FrameConsumer for F
where
    F: Fn(FrameGuard) + Send + Sync + 'static,
{
    fn consume(&self, frame: FrameGuard) {
        self(frame)
    }
}

/// Receiving end of a stream. Must not block the caller.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: FrameGuard);
}

/// Where each stream's frames go
#[derive(Clone)]
pub struct RouterSinks {
    pub drawing: Arc<dyn FrameSink>,
    pub inference: Arc<dyn FrameSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered { role: StreamRole, buffer: u64 },
    /// Event fired but the stream had nothing queued
    Empty,
    /// Teardown in progress; the buffer was released unprocessed
    Discarded,
    UnknownStream,
}

#[derive(Default)]
struct Stats {
    delivered_drawing: AtomicUsize,
    delivered_inference: AtomicUsize,
    discarded: AtomicUsize,
    unknown: AtomicUsize,
}

/// Snapshot of router and pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub delivered_drawing: usize,
    pub delivered_inference: usize,
    pub discarded: usize,
    pub unknown: usize,
    pub drawing_pool: PoolStats,
    pub inference_pool: PoolStats,
}

pub struct FrameRouter {
    drawing: Arc<StreamPool>,
    inference: Arc<StreamPool>,
    sinks: RouterSinks,
    closing: Arc<AtomicBool>,
    stats: CachePadded<Stats>,
}

impl FrameRouter {
    pub fn new(
        drawing: Arc<StreamPool>,
        inference: Arc<StreamPool>,
        sinks: RouterSinks,
        closing: Arc<AtomicBool>,
    ) -> Self {
        debug!(drawing = %drawing.id(), inference = %inference.id(), "frame router ready");
        Self {
            drawing,
            inference,
            sinks,
            closing,
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn drawing_pool(&self) -> &Arc<StreamPool> {
        &self.drawing
    }

    pub fn inference_pool(&self) -> &Arc<StreamPool> {
        &self.inference
    }

    fn pool(&self, stream: StreamId) -> Option<&Arc<StreamPool>> {
        if stream == self.drawing.id() {
            Some(&self.drawing)
        } else if stream == self.inference.id() {
            Some(&self.inference)
        } else {
            None
        }
    }

    /// Buffer-available callback for `stream`
    pub fn on_buffer_available(&self, stream: StreamId) -> RouteOutcome {
        let Some(pool) = self.pool(stream) else {
            self.stats.unknown.fetch_add(1, Ordering::Relaxed);
            warn!(%stream, "buffer from an unknown stream");
            return RouteOutcome::UnknownStream;
        };
        let Some(frame) = pool.acquire_latest() else {
            return RouteOutcome::Empty;
        };

        if self.closing.load(Ordering::Acquire) {
            trace!(%stream, buffer = frame.buffer_id(), "closing, buffer released unprocessed");
            drop(frame);
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return RouteOutcome::Discarded;
        }

        let role = pool.role();
        let buffer = frame.buffer_id();
        let (sink, counter) = match role {
            StreamRole::Drawing => (&self.sinks.drawing, &self.stats.delivered_drawing),
            StreamRole::Inference => (&self.sinks.inference, &self.stats.delivered_inference),
        };
        sink.deliver(frame);
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("argus_frames_delivered_total", "stream" => role.as_str()).increment(1);
        RouteOutcome::Delivered { role, buffer }
    }

    /// Take and release whatever `stream` has queued, without dispatching
    pub fn discard(&self, stream: StreamId) -> RouteOutcome {
        match self.pool(stream).and_then(|pool| pool.acquire_latest()) {
            Some(frame) => {
                drop(frame);
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Discarded
            }
            None => RouteOutcome::Empty,
        }
    }

    /// Close both pools, releasing every queued buffer
    pub fn close(&self) {
        self.drawing.close();
        self.inference.close();
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered_drawing: self.stats.delivered_drawing.load(Ordering::Relaxed),
            delivered_inference: self.stats.delivered_inference.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
            unknown: self.stats.unknown.load(Ordering::Relaxed),
            drawing_pool: self.drawing.stats(),
            inference_pool: self.inference.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{Frame, FrameMetadata, Orientation, PixelFormat, Plane};
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            vec![Plane::new(Bytes::from_static(&[0; 4]), 2, 1)],
            FrameMetadata {
                sequence,
                width: 2,
                height: 2,
                format: PixelFormat::Gray8,
                orientation: Orientation::Deg0,
                device_timestamp: None,
            },
        )
    }

    #[derive(Default)]
    struct Recorder {
        buffers: Mutex<Vec<u64>>,
    }

    impl FrameSink for Recorder {
        fn deliver(&self, frame: FrameGuard) {
            self.buffers.lock().unwrap().push(frame.buffer_id());
        }
    }

    fn router() -> (FrameRouter, Arc<Recorder>, Arc<Recorder>, Arc<AtomicBool>) {
        let drawing = Arc::new(Recorder::default());
        let inference = Arc::new(Recorder::default());
        let closing = Arc::new(AtomicBool::new(false));
        let router = FrameRouter::new(
            StreamPool::new(StreamRole::Drawing, 3),
            StreamPool::new(StreamRole::Inference, 3),
            RouterSinks {
                drawing: drawing.clone(),
                inference: inference.clone(),
            },
            Arc::clone(&closing),
        );
        (router, drawing, inference, closing)
    }

    #[test]
    fn streams_go_to_their_own_sink_with_distinct_buffers() {
        let (router, drawing, inference, _) = router();
        let d = router.drawing_pool().id();
        let i = router.inference_pool().id();

        for seq in 0..10 {
            router.drawing_pool().offer(frame(seq)).unwrap();
            router.inference_pool().offer(frame(seq)).unwrap();
            assert!(matches!(
                router.on_buffer_available(d),
                RouteOutcome::Delivered { role: StreamRole::Drawing, .. }
            ));
            assert!(matches!(
                router.on_buffer_available(i),
                RouteOutcome::Delivered { role: StreamRole::Inference, .. }
            ));
        }

        let drawn: HashSet<u64> = drawing.buffers.lock().unwrap().iter().copied().collect();
        let inferred: HashSet<u64> = inference.buffers.lock().unwrap().iter().copied().collect();
        assert_eq!(drawn.len(), 10);
        assert_eq!(inferred.len(), 10);
        assert!(drawn.is_disjoint(&inferred));
    }

    #[test]
    fn closing_releases_without_dispatch() {
        let (router, drawing, _, closing) = router();
        let pool = Arc::clone(router.drawing_pool());
        pool.offer(frame(1)).unwrap();
        closing.store(true, Ordering::Release);

        assert_eq!(router.on_buffer_available(pool.id()), RouteOutcome::Discarded);
        assert!(drawing.buffers.lock().unwrap().is_empty());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn unknown_and_empty_streams() {
        let (router, _, _, _) = router();
        let stranger = StreamPool::new(StreamRole::Drawing, 3);
        assert_eq!(
            router.on_buffer_available(stranger.id()),
            RouteOutcome::UnknownStream
        );
        assert_eq!(
            router.on_buffer_available(router.inference_pool().id()),
            RouteOutcome::Empty
        );
        assert_eq!(router.stats().unknown, 1);
    }
}
