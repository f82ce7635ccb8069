//! Non-blocking hand-off from the capture context to a consumer context

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{trace, warn};

use crate::capture::refcount::FrameGuard;
use crate::pipeline::pool::StreamRole;
use crate::pipeline::router::{FrameConsumer, FrameSink};
use crate::pipeline::tasks::TaskHandle;

struct Shared<C> {
    role: StreamRole,
    consumer: C,
    /// Newest frame not yet picked up by the consumer
    slot: Mutex<Option<FrameGuard>>,
    /// A job is queued on the task and will drain the slot
    scheduled: AtomicBool,
    consumed: AtomicUsize,
    superseded: AtomicUsize,
}

impl<C: FrameConsumer> Shared<C> {
    fn take(&self) -> Option<FrameGuard> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn drain(&self) {
        self.scheduled.store(false, Ordering::Release);
        if let Some(frame) = self.take() {
            self.consumed.fetch_add(1, Ordering::Relaxed);
            self.consumer.consume(frame);
        }
    }
}

/// One-slot mailbox in front of a consumer running on its own task.
///
/// `deliver` never waits: a frame still pending when the next one arrives is
/// released and replaced, so a slow consumer only ever sees the newest frame.
pub struct ConsumerLane<C> {
    shared: Arc<Shared<C>>,
    task: TaskHandle,
}

impl<C: FrameConsumer> ConsumerLane<C> {
    pub fn new(role: StreamRole, consumer: C, task: TaskHandle) -> Self {
        Self {
            shared: Arc::new(Shared {
                role,
                consumer,
                slot: Mutex::new(None),
                scheduled: AtomicBool::new(false),
                consumed: AtomicUsize::new(0),
                superseded: AtomicUsize::new(0),
            }),
            task,
        }
    }

    pub fn consumer(&self) -> &C {
        &self.shared.consumer
    }

    pub fn consumed(&self) -> usize {
        self.shared.consumed.load(Ordering::Relaxed)
    }

    pub fn superseded(&self) -> usize {
        self.shared.superseded.load(Ordering::Relaxed)
    }
}

impl<C: FrameConsumer> FrameSink for ConsumerLane<C> {
    fn deliver(&self, frame: FrameGuard) {
        let stale = self
            .shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(frame);
        if let Some(stale) = stale {
            trace!(stream = self.shared.role.as_str(), buffer = stale.buffer_id(), "superseded");
            drop(stale);
            self.shared.superseded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("argus_frames_dropped_total", "stream" => self.shared.role.as_str())
                .increment(1);
        }

        if self.shared.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        if self.task.post(move || shared.drain()).is_err() {
            warn!(task = self.task.name(), "consumer task stopped, releasing pending frame");
            self.shared.scheduled.store(false, Ordering::Release);
            drop(self.shared.take());
        }
    }
}

/// Runs the consumer directly on the caller's context
pub struct InlineSink<C> {
    consumer: C,
}

impl<C: FrameConsumer> InlineSink<C> {
    pub fn new(consumer: C) -> Self {
        Self { consumer }
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }
}

impl<C: FrameConsumer> FrameSink for InlineSink<C> {
    fn deliver(&self, frame: FrameGuard) {
        self.consumer.consume(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{Frame, FrameMetadata, Orientation, PixelFormat, Plane};
    use crate::capture::refcount::RefCountedFrame;
    use crate::pipeline::tasks::BackgroundTask;
    use bytes::Bytes;
    use std::time::Duration;

    fn guard(sequence: u64, closes: &Arc<AtomicUsize>) -> FrameGuard {
        let closes = Arc::clone(closes);
        let frame = Frame::new(
            vec![Plane::new(Bytes::from_static(&[0; 4]), 2, 1)],
            FrameMetadata {
                sequence,
                width: 2,
                height: 2,
                format: PixelFormat::Gray8,
                orientation: Orientation::Deg0,
                device_timestamp: None,
            },
        );
        RefCountedFrame::with_release(frame, move || {
            closes.fetch_add(1, Ordering::SeqCst);
        })
    }

    struct Blocking {
        gate: flume::Receiver<()>,
        seen: flume::Sender<u64>,
    }

    impl FrameConsumer for Blocking {
        fn consume(&self, frame: FrameGuard) {
            let _ = self.gate.recv_timeout(Duration::from_secs(2));
            let _ = self.seen.send(frame.frame().unwrap().meta.sequence);
        }
    }

    #[test]
    fn busy_consumer_only_gets_the_newest_frame() {
        let task = BackgroundTask::start("LaneTask").unwrap();
        let (gate_tx, gate_rx) = flume::unbounded();
        let (seen_tx, seen_rx) = flume::unbounded();
        let lane = ConsumerLane::new(
            StreamRole::Inference,
            Blocking {
                gate: gate_rx,
                seen: seen_tx,
            },
            task.handle(),
        );
        let closes = Arc::new(AtomicUsize::new(0));

        // First frame is picked up and blocks the consumer
        lane.deliver(guard(1, &closes));
        std::thread::sleep(Duration::from_millis(50));
        for seq in 2..=5 {
            lane.deliver(guard(seq, &closes));
        }
        assert_eq!(lane.superseded(), 3);

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 5);

        drop(task);
        assert_eq!(closes.load(Ordering::SeqCst), 5);
    }
}
