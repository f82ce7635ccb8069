//! Camera backend without hardware
//!
//! Generates a moving test pattern at a fixed rate into every target of the
//! repeating request. Used by the demo binary when no device is configured
//! and by the integration tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::capture::device::{
    CameraBackend, CameraInfo, CaptureRequest, DeviceEvent, DeviceHandle, EventSender, LensFacing,
    SessionHandle, StreamOutput,
};
use crate::capture::frame::{Frame, FrameMetadata, Orientation, PixelFormat, Plane};
use crate::capture::sizing::Size;
use crate::error::{BackendError, PoolError};

struct Producer {
    stop: flume::Sender<()>,
    thread: JoinHandle<()>,
}

impl Producer {
    fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            warn!("synthetic producer panicked");
        }
    }
}

pub struct SyntheticCamera {
    cameras: Vec<CameraInfo>,
    fps: u32,
    permission: bool,
    permission_requests: usize,

    events: Option<EventSender>,
    device: Option<DeviceHandle>,
    session: Option<SessionHandle>,
    outputs: Vec<StreamOutput>,
    producer: Option<Producer>,
    sequence: Arc<AtomicU64>,
}

impl SyntheticCamera {
    pub fn new(fps: u32) -> Self {
        Self {
            cameras: vec![CameraInfo {
                id: "synthetic0".into(),
                facing: LensFacing::Back,
                sensor_orientation: 90,
                output_sizes: vec![
                    Size::new(1920, 1080),
                    Size::new(1280, 720),
                    Size::new(640, 480),
                    Size::new(320, 240),
                ],
            }],
            fps: fps.max(1),
            permission: true,
            permission_requests: 0,
            events: None,
            device: None,
            session: None,
            outputs: Vec::new(),
            producer: None,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_cameras(mut self, cameras: Vec<CameraInfo>) -> Self {
        self.cameras = cameras;
        self
    }

    /// Start without camera access; the first request grants it
    pub fn without_permission(mut self) -> Self {
        self.permission = false;
        self
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests
    }

    pub fn is_producing(&self) -> bool {
        self.producer.is_some()
    }

    /// Frames generated so far, across all streams
    pub fn frames_generated(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    fn send(&self, event: DeviceEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    fn stop_producer(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.stop();
            debug!("synthetic producer stopped");
        }
    }
}

impl CameraBackend for SyntheticCamera {
    fn has_permission(&self) -> bool {
        self.permission
    }

    fn request_permission(&mut self) {
        self.permission_requests += 1;
        self.permission = true;
        info!("synthetic camera access granted");
    }

    fn cameras(&self) -> Result<Vec<CameraInfo>, BackendError> {
        Ok(self.cameras.clone())
    }

    fn open_device(&mut self, camera_id: &str, events: EventSender) -> Result<DeviceHandle, BackendError> {
        if !self.cameras.iter().any(|camera| camera.id == camera_id) {
            return Err(BackendError::Access(format!("no camera {camera_id}")));
        }
        self.stop_producer();
        let device = DeviceHandle::next();
        self.device = Some(device);
        self.events = Some(events);
        self.send(DeviceEvent::Opened(device));
        Ok(device)
    }

    fn create_capture_session(
        &mut self,
        device: DeviceHandle,
        outputs: Vec<StreamOutput>,
    ) -> Result<(), BackendError> {
        if self.device != Some(device) {
            return Err(BackendError::Device("device is not open".into()));
        }
        self.stop_producer();
        self.outputs = outputs;
        let session = SessionHandle::next();
        self.session = Some(session);
        self.send(DeviceEvent::SessionConfigured { device, session });
        Ok(())
    }

    fn set_repeating_request(
        &mut self,
        session: SessionHandle,
        request: &CaptureRequest,
    ) -> Result<(), BackendError> {
        if self.session != Some(session) {
            return Err(BackendError::Device("session is not configured".into()));
        }
        let targets: Vec<StreamOutput> = self
            .outputs
            .iter()
            .filter(|output| request.targets.contains(&output.id()))
            .cloned()
            .collect();
        if let Some(output) = targets.iter().find(|output| output.format == PixelFormat::Mjpeg) {
            return Err(BackendError::Device(format!(
                "cannot synthesize {:?} for {}",
                output.format,
                output.id()
            )));
        }
        let Some(events) = self.events.clone() else {
            return Err(BackendError::Closed);
        };

        self.stop_producer();
        let (stop, stopped) = flume::bounded(1);
        let interval = Duration::from_secs(1) / self.fps;
        let sequence = Arc::clone(&self.sequence);
        let thread = thread::Builder::new()
            .name("SyntheticCamera".into())
            .spawn(move || produce(targets, events, interval, sequence, stopped))
            .map_err(|err| BackendError::Device(err.to_string()))?;

        info!(fps = self.fps, "synthetic camera streaming");
        self.producer = Some(Producer { stop, thread });
        Ok(())
    }

    fn close_session(&mut self, session: SessionHandle) {
        if self.session == Some(session) {
            self.stop_producer();
            self.session = None;
            self.outputs.clear();
        }
    }

    fn close_device(&mut self, device: DeviceHandle) {
        if self.device == Some(device) {
            self.stop_producer();
            self.session = None;
            self.outputs.clear();
            self.device = None;
            self.events = None;
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop_producer();
    }
}

fn produce(
    targets: Vec<StreamOutput>,
    events: EventSender,
    interval: Duration,
    sequence: Arc<AtomicU64>,
    stopped: flume::Receiver<()>,
) {
    let started = Instant::now();
    loop {
        for output in &targets {
            let seq = sequence.fetch_add(1, Ordering::Relaxed);
            let mut frame = test_pattern(output.size, output.format, seq, output.orientation);
            if let Some(meta) = Arc::get_mut(&mut frame.meta) {
                meta.device_timestamp = Some(started.elapsed());
            }
            match output.pool.offer(frame) {
                Ok(()) => events.send(DeviceEvent::BufferAvailable {
                    stream: output.id(),
                }),
                Err(PoolError::Exhausted { depth }) => {
                    trace!(stream = %output.id(), depth, "all buffers held, frame skipped")
                }
                Err(PoolError::Closed) => return,
            }
        }
        match stopped.recv_timeout(interval) {
            Err(flume::RecvTimeoutError::Timeout) => continue,
            _ => return,
        }
    }
}

/// Diagonal gradient that moves with `sequence`
pub fn test_pattern(size: Size, format: PixelFormat, sequence: u64, orientation: Orientation) -> Frame {
    let (w, h) = (size.width as usize, size.height as usize);
    let shift = (sequence % 256) as usize;
    let luma = |x: usize, y: usize| ((x + y + shift * 4) & 0xff) as u8;

    let planes = match format {
        PixelFormat::Gray8 => vec![luma_plane(w, h, luma)],
        PixelFormat::Yuv420 => {
            let chroma = vec![128u8; (w / 2) * (h / 2)];
            vec![
                luma_plane(w, h, luma),
                Plane::new(Bytes::from(chroma.clone()), w / 2, 1),
                Plane::new(Bytes::from(chroma), w / 2, 1),
            ]
        }
        PixelFormat::Nv12 => vec![
            luma_plane(w, h, luma),
            Plane::new(Bytes::from(vec![128u8; w * (h / 2)]), w, 2),
        ],
        PixelFormat::Yuyv4 => {
            let mut data = Vec::with_capacity(w * h * 2);
            for y in 0..h {
                for x in (0..w).step_by(2) {
                    data.extend_from_slice(&[luma(x, y), 128, luma(x + 1, y), 128]);
                }
            }
            vec![Plane::new(Bytes::from(data), w * 2, 2)]
        }
        PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Rgba32 | PixelFormat::Mjpeg => {
            let bpp = if format == PixelFormat::Rgba32 { 4 } else { 3 };
            let mut data = Vec::with_capacity(w * h * bpp);
            for y in 0..h {
                for x in 0..w {
                    let v = luma(x, y);
                    data.extend_from_slice(&[v, v, v, 0xff][..bpp]);
                }
            }
            vec![Plane::new(Bytes::from(data), w * bpp, bpp)]
        }
    };

    Frame::new(
        planes,
        FrameMetadata {
            sequence,
            width: size.width,
            height: size.height,
            format,
            orientation,
            device_timestamp: None,
        },
    )
}

fn luma_plane(w: usize, h: usize, luma: impl Fn(usize, usize) -> u8) -> Plane {
    let mut data = Vec::with_capacity(w * h);
    for y in 0..h {
        data.extend((0..w).map(|x| luma(x, y)));
    }
    Plane::new(Bytes::from(data), w, 1)
}
