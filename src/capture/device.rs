//! Camera platform boundary
//!
//! A `CameraBackend` is the hardware side: it opens devices, builds capture
//! sessions over a set of output streams and fills their buffer pools.
//! Everything it has to say afterwards comes back as a `DeviceEvent` through
//! the `EventSender` it was handed at open time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capture::frame::{Orientation, PixelFormat};
use crate::capture::sizing::Size;
use crate::error::BackendError;
use crate::pipeline::pool::{StreamId, StreamPool};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identity of one opened device. Every open produces a fresh one, so a
/// callback for a device that has since been closed can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of one configured capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Everything a backend reports asynchronously
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Opened(DeviceHandle),
    Disconnected(DeviceHandle),
    Error { device: DeviceHandle, code: i32 },
    SessionConfigured {
        device: DeviceHandle,
        session: SessionHandle,
    },
    SessionConfigureFailed { device: DeviceHandle },
    BufferAvailable { stream: StreamId },
}

/// Delivers device events into the owning context
#[derive(Clone)]
pub struct EventSender(Arc<dyn Fn(DeviceEvent) + Send + Sync>);

impl EventSender {
    pub fn new(dispatch: impl Fn(DeviceEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(dispatch))
    }

    /// Events land in a channel; whoever owns the receiver drives the session
    pub fn channel(tx: flume::Sender<DeviceEvent>) -> Self {
        Self::new(move |event| {
            let _ = tx.send(event);
        })
    }

    pub fn send(&self, event: DeviceEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSender")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LensFacing {
    Front,
    Back,
    External,
}

/// Static description of a camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub id: String,
    pub facing: LensFacing,
    /// Clockwise degrees the sensor image must be rotated to be upright
    pub sensor_orientation: u32,
    pub output_sizes: Vec<Size>,
}

/// One output stream of a capture session
#[derive(Debug, Clone)]
pub struct StreamOutput {
    pub pool: Arc<StreamPool>,
    pub size: Size,
    pub format: PixelFormat,
    pub orientation: Orientation,
}

impl StreamOutput {
    pub fn id(&self) -> StreamId {
        self.pool.id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    Record,
    StillCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfMode {
    Off,
    Auto,
    ContinuousVideo,
    ContinuousPicture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeMode {
    Off,
    On,
    OnAutoFlash,
}

/// Repeating capture request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub targets: Vec<StreamId>,
    pub af_mode: AfMode,
    pub ae_mode: AeMode,
}

impl CaptureRequest {
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
            af_mode: AfMode::Auto,
            ae_mode: AeMode::On,
        }
    }

    pub fn target(mut self, stream: StreamId) -> Self {
        self.targets.push(stream);
        self
    }

    pub fn af_mode(mut self, mode: AfMode) -> Self {
        self.af_mode = mode;
        self
    }

    pub fn ae_mode(mut self, mode: AeMode) -> Self {
        self.ae_mode = mode;
        self
    }
}

/// Hardware side of the pipeline
pub trait CameraBackend: Send {
    fn has_permission(&self) -> bool;

    /// Ask for camera access out-of-band; the answer arrives later, if ever
    fn request_permission(&mut self);

    fn cameras(&self) -> Result<Vec<CameraInfo>, BackendError>;

    /// Start opening `camera_id`. Returns the handle the device will report
    /// under; completion is reported as `Opened`, `Disconnected` or `Error`
    /// through `events`
    fn open_device(&mut self, camera_id: &str, events: EventSender) -> Result<DeviceHandle, BackendError>;

    /// Start configuring a session over `outputs`; completion is reported as
    /// `SessionConfigured` or `SessionConfigureFailed`
    fn create_capture_session(
        &mut self,
        device: DeviceHandle,
        outputs: Vec<StreamOutput>,
    ) -> Result<(), BackendError>;

    /// Start filling the request's targets until the session is closed
    fn set_repeating_request(
        &mut self,
        session: SessionHandle,
        request: &CaptureRequest,
    ) -> Result<(), BackendError>;

    fn close_session(&mut self, session: SessionHandle);

    fn close_device(&mut self, device: DeviceHandle);
}

impl<B: CameraBackend + ?Sized> CameraBackend for Box<B> {
    fn has_permission(&self) -> bool {
        (**self).has_permission()
    }

    fn request_permission(&mut self) {
        (**self).request_permission()
    }

    fn cameras(&self) -> Result<Vec<CameraInfo>, BackendError> {
        (**self).cameras()
    }

    fn open_device(&mut self, camera_id: &str, events: EventSender) -> Result<DeviceHandle, BackendError> {
        (**self).open_device(camera_id, events)
    }

    fn create_capture_session(
        &mut self,
        device: DeviceHandle,
        outputs: Vec<StreamOutput>,
    ) -> Result<(), BackendError> {
        (**self).create_capture_session(device, outputs)
    }

    fn set_repeating_request(
        &mut self,
        session: SessionHandle,
        request: &CaptureRequest,
    ) -> Result<(), BackendError> {
        (**self).set_repeating_request(session, request)
    }

    fn close_session(&mut self, session: SessionHandle) {
        (**self).close_session(session)
    }

    fn close_device(&mut self, device: DeviceHandle) {
        (**self).close_device(device)
    }
}
