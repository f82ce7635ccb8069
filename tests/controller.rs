mod common;

use std::sync::Arc;
use std::time::Duration;

use argus::capture::device::DeviceEvent;
use argus::capture::sizing::Size;
use argus::capture::{CaptureController, CaptureState, Orientation, SessionReport, SyntheticCamera};
use argus::consumer::{preview_channel, DrawingConsumer, InferenceConsumer};
use argus::engine::{Engine, EngineConfig, ReplayRecognizer};
use argus::error::SessionError;
use argus::overlay::ResultOverlay;
use argus::pipeline::{BackgroundTask, BackgroundTaskPool, ConsumerLane, RouterSinks, StreamRole};
use argus::CaptureConfig;

use common::{counting_sinks, wait_for, Call, Scripted};

const SETTLE: Duration = Duration::from_secs(3);

fn quick_config() -> CaptureConfig {
    CaptureConfig {
        lock_timeout_ms: 200,
        close_retries: 1,
        ..CaptureConfig::default()
    }
}

#[test]
fn second_open_times_out_while_the_first_is_pending() {
    let capture = BackgroundTask::start("CaptureTest").unwrap();
    let (backend, _script) = Scripted::new();
    let (sinks, _, _) = counting_sinks();
    let controller = CaptureController::new(backend, &quick_config(), capture.handle(), sinks);

    controller.open(640, 480).unwrap();
    assert_eq!(controller.state(), CaptureState::Opening);

    let err = controller.open(640, 480).unwrap_err();
    assert!(matches!(err, SessionError::LockTimeout(waited) if waited == Duration::from_millis(200)));
}

#[test]
fn disconnect_during_open_lets_the_next_open_through() {
    let capture = BackgroundTask::start("CaptureTest").unwrap();
    let (backend, script) = Scripted::new();
    let (sinks, _, _) = counting_sinks();
    let controller = CaptureController::new(backend, &quick_config(), capture.handle(), sinks);

    controller.open(640, 480).unwrap();
    script.send(DeviceEvent::Disconnected(script.last_device()));
    assert!(wait_for(SETTLE, || controller.state() == CaptureState::Closed));
    assert_eq!(controller.reports().recv_timeout(SETTLE).unwrap(), SessionReport::Disconnected);

    controller.open(640, 480).unwrap();
    assert_eq!(controller.state(), CaptureState::Opening);
    assert_eq!(script.count(|c| matches!(c, Call::Open(_))), 2);
}

#[test]
fn close_waits_for_a_pending_open_then_gives_up() {
    let capture = BackgroundTask::start("CaptureTest").unwrap();
    let (backend, _script) = Scripted::new();
    let (sinks, _, _) = counting_sinks();
    let controller = CaptureController::new(backend, &quick_config(), capture.handle(), sinks);

    controller.open(640, 480).unwrap();
    // the device never answers, so the open permit is never handed back
    let err = controller.close().unwrap_err();
    assert!(matches!(err, SessionError::LockTimeout(_)));
    assert!(!controller.is_closing());
}

#[test]
fn shutdown_reports_the_close_failure() {
    let mut tasks = BackgroundTaskPool::start(false).unwrap();
    let (backend, _script) = Scripted::new();
    let (sinks, _, _) = counting_sinks();
    let controller = CaptureController::new(backend, &quick_config(), tasks.capture.handle(), sinks);

    controller.open(640, 480).unwrap();
    let err = controller.shutdown(&mut tasks).unwrap_err();
    assert!(matches!(err, SessionError::LockTimeout(_)));
    assert_eq!(controller.state(), CaptureState::Opening);
}

#[test]
fn events_are_applied_on_the_capture_context() {
    let capture = BackgroundTask::start("CaptureTest").unwrap();
    let (backend, script) = Scripted::new();
    let (sinks, _, _) = counting_sinks();
    let controller = CaptureController::new(backend, &quick_config(), capture.handle(), sinks);

    controller.open(640, 480).unwrap();
    let device = script.last_device();
    script.send(DeviceEvent::Opened(device));
    assert!(wait_for(SETTLE, || controller.state() == CaptureState::ConfiguringSession));
    assert_eq!(controller.inspect(|session| session.device()), Some(device));

    controller.close().unwrap();
    assert_eq!(controller.state(), CaptureState::Closed);
    assert_eq!(script.count(|c| *c == Call::CloseDevice(device)), 1);
}

#[test]
fn synthetic_camera_streams_into_both_sinks() {
    let mut tasks = BackgroundTaskPool::start(false).unwrap();
    let (sinks, drawing, inference) = counting_sinks();
    let controller = CaptureController::new(
        SyntheticCamera::new(120),
        &CaptureConfig::default(),
        tasks.capture.handle(),
        sinks,
    );

    controller.open(640, 480).unwrap();
    let report = controller.reports().recv_timeout(SETTLE).unwrap();
    assert_eq!(
        report,
        SessionReport::Streaming {
            preview: Size::new(640, 480),
            orientation: Orientation::Deg90,
        }
    );
    assert!(wait_for(SETTLE, || drawing.delivered() >= 3 && inference.delivered() >= 3));

    controller.close().unwrap();
    assert_eq!(controller.state(), CaptureState::Closed);
    assert!(!controller.inspect(|session| session.backend().is_producing()));
    assert_eq!(controller.reports().recv_timeout(SETTLE).unwrap(), SessionReport::Closed);

    controller.shutdown(&mut tasks).unwrap();
    assert_eq!(controller.state(), CaptureState::Idle);
}

#[test]
fn full_pipeline_updates_preview_and_overlay() {
    let payload = r#"{"zones":[{"klass":2,"skew":0,"text":"H0013I","confidences":[99,95],"warpedBox":[10,10,200,10,200,40,10,40]}]}"#;
    let engine = Arc::new(
        Engine::init(ReplayRecognizer::from_json(payload).unwrap(), &EngineConfig::default()).unwrap(),
    );
    let overlay = Arc::new(ResultOverlay::default());
    let (publisher, previews) = preview_channel();

    let mut tasks = BackgroundTaskPool::start(false).unwrap();
    let sinks = RouterSinks {
        drawing: Arc::new(ConsumerLane::new(
            StreamRole::Drawing,
            DrawingConsumer::new(publisher),
            tasks.drawing.handle(),
        )),
        inference: Arc::new(ConsumerLane::new(
            StreamRole::Inference,
            InferenceConsumer::new(Arc::clone(&engine), Arc::clone(&overlay)),
            tasks.inference.handle(),
        )),
    };
    let controller = CaptureController::new(
        SyntheticCamera::new(60),
        &CaptureConfig::default(),
        tasks.capture.handle(),
        sinks,
    );
    controller.open(640, 480).unwrap();

    let preview = previews.recv_timeout(SETTLE).unwrap();
    assert_eq!((preview.image.width, preview.image.height), (480, 640));

    assert!(wait_for(SETTLE, || overlay.snapshot().image_size.is_some()));
    let state = overlay.snapshot();
    assert_eq!(state.image_size, Some(Size::new(480, 640)));
    assert_eq!(state.zones.len(), 1);
    assert_eq!(state.zones[0].display_text(), "{0013}");

    controller.shutdown(&mut tasks).unwrap();
    let stats = engine.with_recognizer(|r| r.frames_processed()).unwrap();
    assert!(stats >= 1);
}
