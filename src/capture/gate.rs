//! Counted mutual exclusion with a mandatory acquisition timeout

use std::time::Duration;

use flume::{Receiver, Sender, TrySendError};
use tracing::{trace, warn};

use crate::error::GateError;

/// Semaphore guarding camera open/close. Permits are tokens in a bounded
/// channel; there is no acquisition without a timeout.
#[derive(Debug, Clone)]
pub struct TimedGate {
    tx: Sender<()>,
    rx: Receiver<()>,
    permits: usize,
}

impl TimedGate {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        let (tx, rx) = flume::bounded(permits);
        for _ in 0..permits {
            let filled = tx.try_send(());
            debug_assert!(filled.is_ok(), "gate channel sized to its permits");
        }
        Self { tx, rx, permits }
    }

    pub fn acquire(&self, timeout: Duration) -> Result<GatePermit, GateError> {
        self.rx
            .recv_timeout(timeout)
            .map(|()| GatePermit {
                tx: self.tx.clone(),
            })
            .map_err(|_| GateError::Timeout(timeout))
    }

    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.rx.try_recv().ok().map(|()| GatePermit {
            tx: self.tx.clone(),
        })
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.permits
    }
}

/// Held permit; handing it back happens on drop, wherever the holder ends up
#[must_use = "dropping a permit releases the gate immediately"]
#[derive(Debug)]
pub struct GatePermit {
    tx: Sender<()>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => warn!("permit returned to a gate that was already full"),
            Err(TrySendError::Disconnected(())) => trace!("permit outlived its gate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn permit_returns_on_drop() {
        let gate = TimedGate::new(1);
        let permit = gate.acquire(Duration::from_millis(10)).unwrap();
        assert_eq!(gate.available(), 0);
        assert!(gate.try_acquire().is_none());
        drop(permit);
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn acquisition_times_out_instead_of_blocking() {
        let gate = TimedGate::new(1);
        let _held = gate.acquire(Duration::from_millis(10)).unwrap();

        let start = Instant::now();
        let err = gate.acquire(Duration::from_millis(50)).unwrap_err();
        assert_eq!(err, GateError::Timeout(Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn permit_released_on_another_thread_unblocks_waiter() {
        let gate = TimedGate::new(1);
        let permit = gate.acquire(Duration::from_millis(10)).unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(permit);
        });

        assert!(gate.acquire(Duration::from_secs(2)).is_ok());
        releaser.join().unwrap();
    }

    #[test]
    fn starts_full_and_tolerates_permits_outliving_it() {
        let gate = TimedGate::new(2);
        assert_eq!(gate.available(), 2);
        assert_eq!(gate.capacity(), 2);

        let permit = gate.try_acquire().unwrap();
        drop(gate);
        drop(permit);
    }
}
