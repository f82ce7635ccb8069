#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use argus::capture::device::{
    CameraBackend, CameraInfo, CaptureRequest, DeviceEvent, DeviceHandle, EventSender, LensFacing,
    SessionHandle, StreamOutput,
};
use argus::capture::sizing::Size;
use argus::capture::FrameGuard;
use argus::error::BackendError;
use argus::pipeline::{FrameSink, RouterSinks};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    RequestPermission,
    Open(String),
    CreateSession(DeviceHandle),
    Repeating(SessionHandle, CaptureRequest),
    CloseSession(SessionHandle),
    CloseDevice(DeviceHandle),
}

/// What the scripted backend has seen, readable after it moved into a session
#[derive(Clone, Default)]
pub struct Script {
    calls: Arc<Mutex<Vec<Call>>>,
    events: Arc<Mutex<Option<EventSender>>>,
    opened: Arc<Mutex<Vec<DeviceHandle>>>,
    outputs: Arc<Mutex<Vec<StreamOutput>>>,
}

impl Script {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| matches(call)).count()
    }

    /// Deliver a device callback the way the backend would
    pub fn send(&self, event: DeviceEvent) {
        let events = self.events.lock().unwrap().clone();
        events.expect("device was never opened").send(event);
    }

    /// Handle handed out by the most recent `open_device`
    pub fn last_device(&self) -> DeviceHandle {
        *self.opened.lock().unwrap().last().expect("device was never opened")
    }

    pub fn outputs(&self) -> Vec<StreamOutput> {
        self.outputs.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Backend that records calls and never answers on its own
pub struct Scripted {
    pub permission: bool,
    pub cameras: Vec<CameraInfo>,
    pub script: Script,
}

impl Scripted {
    pub fn new() -> (Self, Script) {
        let script = Script::default();
        let backend = Self {
            permission: true,
            cameras: vec![CameraInfo {
                id: "back".into(),
                facing: LensFacing::Back,
                sensor_orientation: 90,
                output_sizes: vec![Size::new(1280, 720), Size::new(640, 480)],
            }],
            script: script.clone(),
        };
        (backend, script)
    }
}

impl CameraBackend for Scripted {
    fn has_permission(&self) -> bool {
        self.permission
    }

    fn request_permission(&mut self) {
        self.script.record(Call::RequestPermission);
    }

    fn cameras(&self) -> Result<Vec<CameraInfo>, BackendError> {
        Ok(self.cameras.clone())
    }

    fn open_device(&mut self, camera_id: &str, events: EventSender) -> Result<DeviceHandle, BackendError> {
        let device = DeviceHandle::next();
        *self.script.events.lock().unwrap() = Some(events);
        self.script.opened.lock().unwrap().push(device);
        self.script.record(Call::Open(camera_id.to_string()));
        Ok(device)
    }

    fn create_capture_session(&mut self, device: DeviceHandle, outputs: Vec<StreamOutput>) -> Result<(), BackendError> {
        *self.script.outputs.lock().unwrap() = outputs;
        self.script.record(Call::CreateSession(device));
        Ok(())
    }

    fn set_repeating_request(&mut self, session: SessionHandle, request: &CaptureRequest) -> Result<(), BackendError> {
        self.script.record(Call::Repeating(session, request.clone()));
        Ok(())
    }

    fn close_session(&mut self, session: SessionHandle) {
        self.script.record(Call::CloseSession(session));
    }

    fn close_device(&mut self, device: DeviceHandle) {
        self.script.record(Call::CloseDevice(device));
    }
}

/// Sink that counts deliveries and lets the frame go at once
#[derive(Default)]
pub struct Counting {
    pub delivered: AtomicUsize,
}

impl Counting {
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl FrameSink for Counting {
    fn deliver(&self, frame: FrameGuard) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        drop(frame);
    }
}

pub fn counting_sinks() -> (RouterSinks, Arc<Counting>, Arc<Counting>) {
    let drawing = Arc::new(Counting::default());
    let inference = Arc::new(Counting::default());
    let sinks = RouterSinks {
        drawing: Arc::clone(&drawing) as Arc<dyn FrameSink>,
        inference: Arc::clone(&inference) as Arc<dyn FrameSink>,
    };
    (sinks, drawing, inference)
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
