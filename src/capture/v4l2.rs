//! V4L2 camera backend
//!
//! V4L2 opens synchronously, so the asynchronous callbacks are emitted right
//! after each call succeeds. One capture thread dequeues mmap buffers and
//! copies every frame into each target stream's pool.

use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, info, instrument, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::device::{
    CameraBackend, CameraInfo, CaptureRequest, DeviceEvent, DeviceHandle, EventSender, LensFacing,
    SessionHandle, StreamOutput,
};
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat, Plane};
use crate::capture::sizing::Size;
use crate::error::{BackendError, PoolError};

const MAX_NODES: usize = 10;

fn fourcc(format: PixelFormat) -> Option<FourCC> {
    match format {
        PixelFormat::Mjpeg => Some(FourCC::new(b"MJPG")),
        PixelFormat::Yuyv4 => Some(FourCC::new(b"YUYV")),
        _ => None,
    }
}

fn device_error(err: std::io::Error) -> BackendError {
    BackendError::Device(err.to_string())
}

struct Capturing {
    stop: flume::Sender<()>,
    thread: JoinHandle<()>,
}

impl Capturing {
    fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            warn!("v4l2 capture thread panicked");
        }
    }
}

/// V4L2 device nodes under `/dev/video*`
pub struct V4l2Camera {
    buffer_count: u32,
    events: Option<EventSender>,
    opened: Option<(DeviceHandle, String)>,
    session: Option<SessionHandle>,
    outputs: Vec<StreamOutput>,
    capturing: Option<Capturing>,
}

impl V4l2Camera {
    pub fn new(buffer_count: u32) -> Self {
        Self {
            buffer_count: buffer_count.max(2),
            events: None,
            opened: None,
            session: None,
            outputs: Vec::new(),
            capturing: None,
        }
    }

    fn send(&self, event: DeviceEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    fn stop_capture(&mut self) {
        if let Some(capturing) = self.capturing.take() {
            capturing.stop();
        }
    }

    fn probe(path: &str) -> Option<CameraInfo> {
        let device = Device::with_path(path).ok()?;
        let caps = device.query_caps().ok()?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return None;
        }

        let mut output_sizes = Vec::new();
        for format in [PixelFormat::Mjpeg, PixelFormat::Yuyv4] {
            let Some(fourcc) = fourcc(format) else {
                continue;
            };
            for size in device.enum_framesizes(fourcc).unwrap_or_default() {
                let size = match size.size {
                    FrameSizeEnum::Discrete(d) => Size::new(d.width, d.height),
                    FrameSizeEnum::Stepwise(s) => Size::new(s.max_width, s.max_height),
                };
                if !output_sizes.contains(&size) {
                    output_sizes.push(size);
                }
            }
        }
        info!(path, card = %caps.card, driver = %caps.driver, sizes = output_sizes.len(), "found capture device");
        Some(CameraInfo {
            id: path.to_string(),
            facing: LensFacing::External,
            sensor_orientation: 0,
            output_sizes,
        })
    }
}

impl CameraBackend for V4l2Camera {
    fn has_permission(&self) -> bool {
        (0..MAX_NODES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .all(|path| std::fs::File::open(path).is_ok())
    }

    fn request_permission(&mut self) {
        warn!("no access to /dev/video*; add the user to the 'video' group");
    }

    fn cameras(&self) -> Result<Vec<CameraInfo>, BackendError> {
        let cameras: Vec<CameraInfo> = (0..MAX_NODES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| Self::probe(&path))
            .collect();
        if cameras.is_empty() {
            return Err(BackendError::Access("no suitable capture device found".into()));
        }
        Ok(cameras)
    }

    #[instrument(skip(self, events))]
    fn open_device(&mut self, camera_id: &str, events: EventSender) -> Result<DeviceHandle, BackendError> {
        let device = Device::with_path(camera_id).map_err(device_error)?;
        let caps = device.query_caps().map_err(device_error)?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(BackendError::Device(format!("{camera_id} doesn't support video capture")));
        }
        self.stop_capture();

        let handle = DeviceHandle::next();
        self.opened = Some((handle, camera_id.to_string()));
        self.events = Some(events);
        self.send(DeviceEvent::Opened(handle));
        Ok(handle)
    }

    fn create_capture_session(
        &mut self,
        device: DeviceHandle,
        outputs: Vec<StreamOutput>,
    ) -> Result<(), BackendError> {
        let Some((handle, path)) = self.opened.clone() else {
            return Err(BackendError::Closed);
        };
        if handle != device {
            return Err(BackendError::Device("device is not open".into()));
        }
        let Some(first) = outputs.first() else {
            return Err(BackendError::Device("no outputs".into()));
        };
        if outputs.iter().any(|o| o.size != first.size || o.format != first.format) {
            // One V4L2 queue feeds every output
            return Err(BackendError::Device("outputs must share size and format".into()));
        }
        let Some(fourcc) = fourcc(first.format) else {
            return Err(BackendError::Device(format!("unsupported pixel format {:?}", first.format)));
        };

        let v4l = Device::with_path(&path).map_err(device_error)?;
        let mut fmt = v4l.format().map_err(device_error)?;
        fmt.width = first.size.width;
        fmt.height = first.size.height;
        fmt.fourcc = fourcc;
        let applied = v4l.set_format(&fmt).map_err(device_error)?;
        if applied.fourcc != fourcc {
            error!(requested = %fourcc, got = %applied.fourcc, "driver refused pixel format");
            self.send(DeviceEvent::SessionConfigureFailed { device });
            return Ok(());
        }

        self.stop_capture();
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
        let (Some((handle, path)), Some(events)) = (self.opened.clone(), self.events.clone()) else {
            return Err(BackendError::Closed);
        };
        let targets: Vec<StreamOutput> = self
            .outputs
            .iter()
            .filter(|output| request.targets.contains(&output.id()))
            .cloned()
            .collect();

        self.stop_capture();
        let (stop, stopped) = flume::bounded(1);
        let buffer_count = self.buffer_count;
        let thread = thread::Builder::new()
            .name("V4l2Capture".into())
            .spawn(move || {
                if let Err(err) = capture_loop(handle, &path, buffer_count, &targets, &events, &stopped) {
                    error!(%err, "v4l2 capture stopped");
                }
            })
            .map_err(device_error)?;
        self.capturing = Some(Capturing { stop, thread });
        info!(buffers = buffer_count, "v4l2 capture stream started");
        Ok(())
    }

    fn close_session(&mut self, session: SessionHandle) {
        if self.session == Some(session) {
            self.stop_capture();
            self.session = None;
            self.outputs.clear();
        }
    }

    fn close_device(&mut self, device: DeviceHandle) {
        if matches!(self.opened, Some((handle, _)) if handle == device) {
            self.stop_capture();
            self.session = None;
            self.outputs.clear();
            self.opened = None;
            self.events = None;
            debug!(?device, "v4l2 device closed");
        }
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

fn capture_loop(
    handle: DeviceHandle,
    path: &str,
    buffer_count: u32,
    targets: &[StreamOutput],
    events: &EventSender,
    stopped: &flume::Receiver<()>,
) -> std::io::Result<()> {
    let device = Device::with_path(path)?;
    let fmt = device.format()?;
    let format = if fmt.fourcc == FourCC::new(b"MJPG") {
        PixelFormat::Mjpeg
    } else {
        PixelFormat::Yuyv4
    };
    let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count)?;
    stream.set_timeout(Duration::from_millis(500));

    let mut sequence = 0u64;
    while stopped.try_recv() == Err(flume::TryRecvError::Empty) {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(err) => {
                events.send(DeviceEvent::Error {
                    device: handle,
                    code: err.raw_os_error().unwrap_or(-1),
                });
                return Err(err);
            }
        };
        let captured = Instant::now();
        let used = (meta.bytesused as usize).min(buf.len());
        let data = Bytes::copy_from_slice(&buf[..used]);
        let (row_stride, pixel_stride) = match format {
            PixelFormat::Mjpeg => (used, 1),
            _ => (fmt.stride as usize, 2),
        };
        let device_timestamp = Some(
            Duration::from_secs(meta.timestamp.sec as u64)
                + Duration::from_micros(meta.timestamp.usec as u64),
        );
        sequence += 1;

        for output in targets {
            let mut frame = Frame::new(
                vec![Plane::new(data.clone(), row_stride, pixel_stride)],
                FrameMetadata {
                    sequence,
                    width: fmt.width,
                    height: fmt.height,
                    format,
                    orientation: output.orientation,
                    device_timestamp,
                },
            );
            frame.timestamp = captured;
            match output.pool.offer(frame) {
                Ok(()) => events.send(DeviceEvent::BufferAvailable { stream: output.id() }),
                Err(PoolError::Exhausted { depth }) => {
                    trace!(stream = %output.id(), depth, "all buffers held, frame skipped")
                }
                Err(PoolError::Closed) => return Ok(()),
            }
        }
    }
    Ok(())
}
