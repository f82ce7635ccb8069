//! Reference-counted ownership of a scarce camera buffer
//!
//! A `RefCountedFrame` is created with one outstanding reference, held by the
//! `FrameGuard` returned from [`RefCountedFrame::new`]. Every further holder
//! calls [`FrameGuard::acquire`]. The underlying buffer is handed back to its
//! producer exactly once, on the release that takes the count from 1 to 0.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::capture::frame::Frame;
use crate::error::FrameError;

/// Runs once when the buffer goes back to its producer
pub type ReleaseHook = Box<dyn FnOnce() + Send>;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

pub struct RefCountedFrame {
    id: u64,
    frame: Frame,
    refs: AtomicUsize,
    closed: AtomicBool,
    on_close: Mutex<Option<ReleaseHook>>,
}

impl RefCountedFrame {
    /// Wrap a frame whose buffer needs no hand-back
    pub fn new(frame: Frame) -> FrameGuard {
        Self::with_release(frame, || {})
    }

    /// Wrap a frame; `on_close` returns the buffer to its producer
    pub fn with_release(frame: Frame, on_close: impl FnOnce() + Send + 'static) -> FrameGuard {
        let cell = Arc::new(Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            frame,
            refs: AtomicUsize::new(1),
            closed: AtomicBool::new(false),
            on_close: Mutex::new(Some(Box::new(on_close))),
        });
        FrameGuard {
            cell,
            released: false,
        }
    }

    /// Take one more reference. Fails once the buffer has been closed.
    pub fn acquire(self: &Arc<Self>) -> Result<FrameGuard, FrameError> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then(|| n + 1)
            })
            .map_err(|_| FrameError::Released)?;
        Ok(FrameGuard {
            cell: Arc::clone(self),
            released: false,
        })
    }

    /// Drop one reference, closing the buffer when it was the last one.
    ///
    /// Only a `FrameGuard` gives its reference back, so every holder releases
    /// at most once. Returns `true` if this call closed the buffer. Releasing
    /// with no outstanding reference is a no-op.
    fn release(&self) -> bool {
        match self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                self.close();
                true
            }
            Ok(_) => false,
            Err(_) => {
                warn!(buffer = self.id, "release on a frame with no outstanding reference");
                false
            }
        }
    }

    /// Borrow the frame. Fails fast after the buffer was closed.
    pub fn get(&self) -> Result<&Frame, FrameError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FrameError::Released);
        }
        let refs = self.refs.load(Ordering::Acquire);
        if refs < 1 {
            return Err(FrameError::InvalidState { refs });
        }
        Ok(&self.frame)
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Identity of the underlying buffer
    pub fn id(&self) -> u64 {
        self.id
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for RefCountedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCountedFrame")
            .field("id", &self.id)
            .field("refs", &self.ref_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One outstanding reference on a frame; released on drop
#[derive(Debug)]
pub struct FrameGuard {
    cell: Arc<RefCountedFrame>,
    released: bool,
}

impl FrameGuard {
    pub fn frame(&self) -> Result<&Frame, FrameError> {
        self.cell.get()
    }

    pub fn acquire(&self) -> Result<FrameGuard, FrameError> {
        self.cell.acquire()
    }

    /// Explicit release; returns `true` if the buffer was closed by it
    pub fn release(mut self) -> bool {
        self.released = true;
        self.cell.release()
    }

    pub fn buffer_id(&self) -> u64 {
        self.cell.id()
    }

    pub fn shared(&self) -> &Arc<RefCountedFrame> {
        &self.cell
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.cell.release();
        }
    }
}
