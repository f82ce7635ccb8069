//! Capture session state machine
//!
//! ```text
//! Idle --open--> Opening --Opened--> Opened --configure--> ConfiguringSession
//!      --SessionConfigured--> Streaming --close--> Closing --> Closed
//! ```
//!
//! Device disconnects and errors take any live state straight to `Closed`.
//! A missing camera permission ends an open attempt in `Error`.
//!
//! The session runs on the capture context: explicit calls and device events
//! are serialized there. The open/close permit is acquired by the caller and
//! handed in; the one taken for `open` is held until the device reports back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::device::{
    AeMode, AfMode, CameraBackend, CameraInfo, CaptureRequest, DeviceEvent, DeviceHandle,
    EventSender, RequestTemplate, SessionHandle, StreamOutput,
};
use crate::capture::frame::Orientation;
use crate::capture::gate::GatePermit;
use crate::capture::sizing::{choose_optimal_size, frame_orientation, select_camera, Size};
use crate::error::SessionError;
use crate::pipeline::pool::{StreamId, StreamPool, StreamRole};
use crate::pipeline::router::{FrameRouter, RouterSinks, RouterStats};
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CaptureState {
    Idle,
    Opening,
    Opened,
    ConfiguringSession,
    Streaming,
    Closing,
    Closed,
    Error,
}

impl CaptureState {
    /// A device may be open or opening
    pub fn is_live(self) -> bool {
        matches!(
            self,
            CaptureState::Opening
                | CaptureState::Opened
                | CaptureState::ConfiguringSession
                | CaptureState::Streaming
                | CaptureState::Closing
        )
    }
}

/// What the session tells its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReport {
    /// Camera access was requested from the user; nothing will retry
    PermissionRequested,
    Streaming {
        preview: Size,
        orientation: Orientation,
    },
    /// The session could not be configured; it stays unconfigured
    ConfigureFailed,
    Disconnected,
    /// The device failed; the owner may end the surrounding flow
    DeviceError { code: i32 },
    Closed,
}

pub struct CaptureSession<B> {
    backend: B,
    config: CaptureConfig,
    state: CaptureState,
    events: EventSender,
    sinks: RouterSinks,
    closing: Arc<AtomicBool>,
    reports: Option<flume::Sender<SessionReport>>,

    /// Held from `open` until the device answers
    open_permit: Option<GatePermit>,
    camera: Option<CameraInfo>,
    preview_size: Option<Size>,
    orientation: Orientation,

    /// Device an open is waiting on
    pending: Option<DeviceHandle>,
    device: Option<DeviceHandle>,
    session: Option<SessionHandle>,
    request: Option<CaptureRequest>,
    router: Option<FrameRouter>,
}

impl<B: CameraBackend> CaptureSession<B> {
    pub fn new(
        backend: B,
        config: CaptureConfig,
        events: EventSender,
        sinks: RouterSinks,
        closing: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            config,
            state: CaptureState::Idle,
            events,
            sinks,
            closing,
            reports: None,
            open_permit: None,
            camera: None,
            preview_size: None,
            orientation: Orientation::Deg0,
            pending: None,
            device: None,
            session: None,
            request: None,
            router: None,
        }
    }

    pub fn with_reports(mut self, reports: flume::Sender<SessionReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn device(&self) -> Option<DeviceHandle> {
        self.device
    }

    /// Device the current open is waiting on
    pub fn pending_device(&self) -> Option<DeviceHandle> {
        self.pending
    }

    pub fn preview_size(&self) -> Option<Size> {
        self.preview_size
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn camera(&self) -> Option<&CameraInfo> {
        self.camera.as_ref()
    }

    pub fn request(&self) -> Option<&CaptureRequest> {
        self.request.as_ref()
    }

    /// Stream identities of the current session, drawing first
    pub fn streams(&self) -> Option<(StreamId, StreamId)> {
        self.router
            .as_ref()
            .map(|router| (router.drawing_pool().id(), router.inference_pool().id()))
    }

    pub fn router_stats(&self) -> Option<RouterStats> {
        self.router.as_ref().map(FrameRouter::stats)
    }

    pub fn holds_open_permit(&self) -> bool {
        self.open_permit.is_some()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Start opening the camera for a `width` x `height` preview
    #[instrument(skip(self, permit), fields(state = ?self.state))]
    pub fn open(&mut self, width: u32, height: u32, permit: GatePermit) -> Result<(), SessionError> {
        match self.state {
            CaptureState::Idle | CaptureState::Closed | CaptureState::Error => {}
            from => return Err(SessionError::InvalidTransition { from, op: "open" }),
        }

        if !self.backend.has_permission() {
            warn!("camera permission missing, requesting it");
            self.backend.request_permission();
            self.state = CaptureState::Error;
            self.report(SessionReport::PermissionRequested);
            return Err(SessionError::PermissionDenied);
        }

        let (camera, preview) = match self.set_up_camera_outputs(width, height) {
            Ok(selected) => selected,
            Err(err) => {
                self.state = CaptureState::Error;
                return Err(err);
            }
        };
        self.orientation = frame_orientation(self.config.display_rotation, camera.sensor_orientation);
        self.preview_size = Some(preview);
        info!(camera = %camera.id, %preview, orientation = self.orientation.degrees(), "opening camera");

        let camera_id = camera.id.clone();
        self.camera = Some(camera);
        self.state = CaptureState::Opening;
        self.open_permit = Some(permit);

        match self.backend.open_device(&camera_id, self.events.clone()) {
            Ok(device) => {
                self.pending = Some(device);
                Ok(())
            }
            Err(err) => {
                error!(%err, "failed to open camera");
                self.open_permit = None;
                self.state = CaptureState::Error;
                Err(err.into())
            }
        }
    }

    fn set_up_camera_outputs(&self, width: u32, height: u32) -> Result<(CameraInfo, Size), SessionError> {
        let cameras = self.backend.cameras()?;
        let camera = select_camera(&cameras, self.config.camera_id.as_deref())
            .cloned()
            .ok_or(SessionError::NoCamera)?;
        let preview =
            choose_optimal_size(&camera.output_sizes, width, height).ok_or(SessionError::NoCamera)?;
        Ok((camera, preview))
    }

    /// Apply one device callback
    pub fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Opened(device) => self.on_opened(device),
            DeviceEvent::Disconnected(device) => self.on_device_lost(device, None),
            DeviceEvent::Error { device, code } => self.on_device_lost(device, Some(code)),
            DeviceEvent::SessionConfigured { device, session } => self.on_configured(device, session),
            DeviceEvent::SessionConfigureFailed { device } => self.on_configure_failed(device),
            DeviceEvent::BufferAvailable { stream } => self.on_buffer_available(stream),
        }
    }

    fn on_opened(&mut self, device: DeviceHandle) {
        if self.state != CaptureState::Opening || self.pending != Some(device) {
            warn!(?device, state = ?self.state, "late open callback, closing device");
            self.backend.close_device(device);
            return;
        }
        self.pending = None;
        self.open_permit = None;
        self.device = Some(device);
        self.state = CaptureState::Opened;
        debug!(?device, "camera opened");
        self.configure_outputs(device);
    }

    fn configure_outputs(&mut self, device: DeviceHandle) {
        let Some(size) = self.preview_size else {
            return;
        };
        let depth = self.config.max_images;
        let drawing = StreamPool::new(StreamRole::Drawing, depth);
        let inference = StreamPool::new(StreamRole::Inference, depth);
        let outputs = [&inference, &drawing]
            .into_iter()
            .map(|pool| StreamOutput {
                pool: Arc::clone(pool),
                size,
                format: self.config.format,
                orientation: self.orientation,
            })
            .collect();

        let router = FrameRouter::new(drawing, inference, self.sinks.clone(), Arc::clone(&self.closing));
        match self.backend.create_capture_session(device, outputs) {
            Ok(()) => {
                self.router = Some(router);
                self.state = CaptureState::ConfiguringSession;
            }
            Err(err) => {
                error!(%err, "failed to create capture session");
                router.close();
                self.report(SessionReport::ConfigureFailed);
            }
        }
    }

    fn on_configured(&mut self, device: DeviceHandle, session: SessionHandle) {
        // Identity, not state, decides: the device may have been replaced
        if self.device != Some(device) || self.state != CaptureState::ConfiguringSession {
            warn!(?device, ?session, state = ?self.state, "stale session callback, closing it");
            self.backend.close_session(session);
            return;
        }
        let Some((drawing, inference)) = self.streams() else {
            self.backend.close_session(session);
            return;
        };
        self.session = Some(session);

        let request = CaptureRequest::new(RequestTemplate::Record)
            .target(inference)
            .target(drawing)
            .af_mode(AfMode::ContinuousPicture)
            .ae_mode(AeMode::OnAutoFlash);

        match self.backend.set_repeating_request(session, &request) {
            Ok(()) => {
                self.request = Some(request);
                self.state = CaptureState::Streaming;
                if let Some(preview) = self.preview_size {
                    info!(%preview, "streaming");
                    self.report(SessionReport::Streaming {
                        preview,
                        orientation: self.orientation,
                    });
                }
            }
            Err(err) => {
                error!(%err, "failed to start repeating request");
                self.backend.close_session(session);
                self.session = None;
                self.drop_router();
                self.state = CaptureState::Opened;
                self.report(SessionReport::ConfigureFailed);
            }
        }
    }

    fn on_configure_failed(&mut self, device: DeviceHandle) {
        if self.device != Some(device) || self.state != CaptureState::ConfiguringSession {
            debug!(?device, "stale configure failure ignored");
            return;
        }
        warn!("capture session configuration failed");
        self.drop_router();
        self.state = CaptureState::Opened;
        self.report(SessionReport::ConfigureFailed);
    }

    fn on_device_lost(&mut self, device: DeviceHandle, code: Option<i32>) {
        let opening = self.state == CaptureState::Opening && self.pending == Some(device);
        if self.device != Some(device) && !opening {
            debug!(?device, "callback for a device no longer in use");
            self.backend.close_device(device);
            return;
        }
        if !self.state.is_live() {
            return;
        }

        match code {
            Some(code) => error!(?device, code, "camera device error"),
            None => warn!(?device, "camera device disconnected"),
        }
        // Permit first: a waiting close or the next open must not deadlock
        self.open_permit = None;
        if self.pending.take().is_some() {
            self.backend.close_device(device);
        }
        self.release_handles();
        self.state = CaptureState::Closed;
        self.report(match code {
            Some(code) => SessionReport::DeviceError { code },
            None => SessionReport::Disconnected,
        });
    }

    fn on_buffer_available(&mut self, stream: StreamId) {
        let Some(router) = self.router.as_ref() else {
            return;
        };
        if self.closing.load(Ordering::Acquire)
            || matches!(self.state, CaptureState::Closing | CaptureState::Closed)
        {
            router.discard(stream);
            return;
        }
        router.on_buffer_available(stream);
    }

    /// Tear the session down. Tolerates missing handles and repeated calls.
    #[instrument(skip(self, permit), fields(state = ?self.state))]
    pub fn close(&mut self, permit: GatePermit) {
        self.closing.store(true, Ordering::Release);
        if self.state.is_live() {
            self.state = CaptureState::Closing;
        }
        self.open_permit = None;
        self.pending = None;
        self.release_handles();
        if self.state == CaptureState::Closing {
            self.state = CaptureState::Closed;
            self.report(SessionReport::Closed);
            info!("camera closed");
        }
        self.closing.store(false, Ordering::Release);
        drop(permit);
    }

    /// Back to `Idle` once the owning context is gone
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.state.is_live() {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                op: "reset",
            });
        }
        self.camera = None;
        self.preview_size = None;
        self.state = CaptureState::Idle;
        Ok(())
    }

    fn release_handles(&mut self) {
        if let Some(session) = self.session.take() {
            self.backend.close_session(session);
        }
        if let Some(device) = self.device.take() {
            self.backend.close_device(device);
        }
        self.drop_router();
        self.request = None;
    }

    fn drop_router(&mut self) {
        if let Some(router) = self.router.take() {
            router.close();
            let stats = router.stats();
            debug!(?stats, "router retired");
        }
    }

    fn report(&self, report: SessionReport) {
        if let Some(reports) = &self.reports {
            let _ = reports.send(report);
        }
    }
}
