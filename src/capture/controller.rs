//! Owner-side handle on a capture session
//!
//! The controller lives with whoever owns the pipeline. It takes the
//! open/close permit on the caller's thread, with a timeout, and then runs the
//! actual transition on the capture context where device callbacks are
//! serialized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::capture::device::{CameraBackend, EventSender};
use crate::capture::gate::{GatePermit, TimedGate};
use crate::capture::session::{CaptureSession, CaptureState, SessionReport};
use crate::error::SessionError;
use crate::pipeline::router::{RouterSinks, RouterStats};
use crate::pipeline::tasks::{BackgroundTaskPool, TaskHandle};
use crate::CaptureConfig;

type SharedSession<B> = Arc<Mutex<CaptureSession<B>>>;

fn lock<B>(session: &Mutex<CaptureSession<B>>) -> MutexGuard<'_, CaptureSession<B>> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CaptureController<B> {
    session: SharedSession<B>,
    capture: TaskHandle,
    gate: TimedGate,
    closing: Arc<AtomicBool>,
    lock_timeout: Duration,
    close_retries: u32,
    reports: flume::Receiver<SessionReport>,
}

impl<B: CameraBackend + 'static> CaptureController<B> {
    pub fn new(backend: B, config: &CaptureConfig, capture: TaskHandle, sinks: RouterSinks) -> Self {
        let closing = Arc::new(AtomicBool::new(false));
        let (report_tx, reports) = flume::unbounded();

        let session = Arc::new_cyclic(|weak: &Weak<Mutex<CaptureSession<B>>>| {
            let events = dispatch_to(weak.clone(), capture.clone());
            Mutex::new(
                CaptureSession::new(backend, config.clone(), events, sinks, Arc::clone(&closing))
                    .with_reports(report_tx),
            )
        });

        Self {
            session,
            capture,
            gate: TimedGate::new(1),
            closing,
            lock_timeout: config.lock_timeout(),
            close_retries: config.close_retries,
            reports,
        }
    }

    /// Open the camera for a `width` x `height` preview.
    ///
    /// Returns once the open has been started; `Opened` and the rest of the
    /// bring-up arrive later on the capture context.
    #[instrument(skip(self))]
    pub fn open(&self, width: u32, height: u32) -> Result<(), SessionError> {
        let permit = self.gate.acquire(self.lock_timeout).map_err(|err| {
            error!(%err, "could not lock camera opening");
            SessionError::from(err)
        })?;
        self.on_capture_context(move |session| session.open(width, height, permit))?
    }

    /// Tear the session down and wait for it to finish
    #[instrument(skip(self))]
    pub fn close(&self) -> Result<(), SessionError> {
        self.closing.store(true, Ordering::Release);
        let result = self
            .acquire_for_close()
            .and_then(|permit| self.on_capture_context(move |session| session.close(permit)));
        self.closing.store(false, Ordering::Release);
        result
    }

    fn acquire_for_close(&self) -> Result<GatePermit, SessionError> {
        let mut attempt = 0;
        loop {
            match self.gate.acquire(self.lock_timeout) {
                Ok(permit) => return Ok(permit),
                Err(err) if attempt < self.close_retries => {
                    attempt += 1;
                    warn!(%err, attempt, "camera close still waiting for the permit");
                }
                Err(err) => {
                    error!(%err, "interrupted while trying to lock camera closing");
                    return Err(err.into());
                }
            }
        }
    }

    /// Run `job` on the capture context and wait, bounded, for its result
    fn on_capture_context<T: Send + 'static>(
        &self,
        job: impl FnOnce(&mut CaptureSession<B>) -> T + Send + 'static,
    ) -> Result<T, SessionError> {
        let (tx, rx) = flume::bounded(1);
        let session = Arc::clone(&self.session);
        self.capture.post(move || {
            let out = job(&mut lock(&session));
            let _ = tx.send(out);
        })?;
        rx.recv_timeout(self.lock_timeout)
            .map_err(|_| SessionError::ReplyTimeout(self.lock_timeout))
    }

    pub fn state(&self) -> CaptureState {
        lock(&self.session).state()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn router_stats(&self) -> Option<RouterStats> {
        lock(&self.session).router_stats()
    }

    /// Short read-only look at the session
    pub fn inspect<R>(&self, f: impl FnOnce(&CaptureSession<B>) -> R) -> R {
        f(&lock(&self.session))
    }

    pub fn reports(&self) -> &flume::Receiver<SessionReport> {
        &self.reports
    }

    /// Close the session, stop every background task and return to `Idle`
    pub fn shutdown(&self, tasks: &mut BackgroundTaskPool) -> Result<(), SessionError> {
        let closed = self.close();
        if let Err(err) = &closed {
            error!(%err, "camera did not close cleanly");
        }
        tasks.stop();

        let mut session = lock(&self.session);
        if let Some(stats) = session.router_stats() {
            info!(?stats, "final router statistics");
        }
        let reset = session.reset();
        match closed {
            Err(err) => {
                if let Err(reset_err) = reset {
                    warn!(%reset_err, "session still live after a failed close");
                }
                Err(err)
            }
            Ok(()) => reset,
        }
    }
}

/// Device events hop onto the capture context before touching the session
fn dispatch_to<B: CameraBackend + 'static>(
    session: Weak<Mutex<CaptureSession<B>>>,
    capture: TaskHandle,
) -> EventSender {
    EventSender::new(move |event| {
        let session = session.clone();
        let posted = capture.post(move || {
            if let Some(session) = session.upgrade() {
                lock(&session).handle_event(event);
            }
        });
        if posted.is_err() {
            warn!("capture context stopped, device event dropped");
        }
    })
}
