//! Fixed-depth buffer pool for one camera output stream
//!
//! The producer offers filled buffers; the router takes the newest one and
//! every older undelivered buffer is released on the spot. A buffer counts
//! against the pool's depth until its last holder releases it, so consumers
//! that sit on frames stall the producer, as hardware buffer queues do.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::capture::frame::Frame;
use crate::capture::refcount::{FrameGuard, RefCountedFrame};
use crate::error::PoolError;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one output stream, unique for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    pub fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// What a stream feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamRole {
    Drawing,
    Inference,
}

impl StreamRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamRole::Drawing => "drawing",
            StreamRole::Inference => "inference",
        }
    }
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
    producer_stalls: AtomicUsize,
}

/// Snapshot of a pool's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub frames_written: usize,
    pub frames_read: usize,
    pub frames_dropped: usize,
    pub producer_stalls: usize,
}

pub struct StreamPool {
    id: StreamId,
    role: StreamRole,
    depth: usize,

    /// Buffers filled but not yet handed to a consumer
    ring: Mutex<HeapRb<FrameGuard>>,

    /// Buffers out of the producer's hands: queued plus held by consumers
    outstanding: Arc<AtomicUsize>,
    closed: AtomicBool,

    /// Statistics
    stats: CachePadded<Stats>,
}

impl StreamPool {
    pub fn new(role: StreamRole, depth: usize) -> Arc<Self> {
        let depth = depth.max(1);
        Arc::new(Self {
            id: StreamId::next(),
            role,
            depth,
            ring: Mutex::new(HeapRb::new(depth)),
            outstanding: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            stats: CachePadded::new(Stats::default()),
        })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Producer: queue a filled buffer.
    ///
    /// When every buffer is out, the oldest undelivered one is recycled. If
    /// all of them sit with consumers the producer is stalled and gets
    /// `PoolError::Exhausted` back.
    pub fn offer(&self, frame: Frame) -> Result<(), PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let mut ring = self.lock_ring();
        if self.outstanding.load(Ordering::Acquire) >= self.depth {
            match ring.try_pop() {
                Some(stale) => {
                    drop(stale);
                    self.count_drop();
                }
                None => {
                    self.stats.producer_stalls.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("argus_producer_stalls_total", "stream" => self.role.as_str())
                        .increment(1);
                    return Err(PoolError::Exhausted { depth: self.depth });
                }
            }
        }

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let outstanding = Arc::clone(&self.outstanding);
        let guard = RefCountedFrame::with_release(frame, move || {
            outstanding.fetch_sub(1, Ordering::AcqRel);
        });
        trace!(stream = %self.id, buffer = guard.buffer_id(), "buffer queued");

        if let Some(overwritten) = ring.push_overwrite(guard) {
            drop(overwritten);
            self.count_drop();
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Consumer side: newest queued buffer, releasing everything older
    pub fn acquire_latest(&self) -> Option<FrameGuard> {
        let mut ring = self.lock_ring();
        let mut latest = None;
        while let Some(guard) = ring.try_pop() {
            if latest.replace(guard).is_some() {
                self.count_drop();
            }
        }
        drop(ring);

        if latest.is_some() {
            self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        }
        latest
    }

    /// Stop accepting buffers and release every queued one
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut ring = self.lock_ring();
        let mut drained = 0;
        while let Some(guard) = ring.try_pop() {
            drop(guard);
            drained += 1;
        }
        if drained > 0 {
            debug!(stream = %self.id, drained, "released queued buffers on close");
        }
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.lock_ring().occupied_len()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            frames_written: self.stats.frames_written.load(Ordering::Relaxed),
            frames_read: self.stats.frames_read.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            producer_stalls: self.stats.producer_stalls.load(Ordering::Relaxed),
        }
    }

    fn count_drop(&self) {
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("argus_frames_dropped_total", "stream" => self.role.as_str())
            .increment(1);
    }

    fn lock_ring(&self) -> MutexGuard<'_, HeapRb<FrameGuard>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPool")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("depth", &self.depth)
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}
