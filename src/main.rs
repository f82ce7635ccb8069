//! Argus capture-and-annotate pipeline

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use argus::capture::device::CameraBackend;
use argus::capture::{CaptureController, SessionReport};
use argus::consumer::{preview_channel, DrawingConsumer, InferenceConsumer};
use argus::display::{run_surface, PreviewSurface};
use argus::engine::{Engine, ImageType, ReplayRecognizer};
use argus::overlay::ResultOverlay;
use argus::pipeline::{
    BackgroundTask, BackgroundTaskPool, ConsumerLane, FrameConsumer, FrameSink, InlineSink, RouterSinks, StreamRole,
};
use argus::Config;
use color_eyre::Result;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::uptime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("argus=info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_timer(uptime()));
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();
}

fn sink<C: FrameConsumer>(role: StreamRole, consumer: C, inline: bool, task: &BackgroundTask) -> Arc<dyn FrameSink> {
    if inline {
        Arc::new(InlineSink::new(consumer))
    } else {
        Arc::new(ConsumerLane::new(role, consumer, task.handle()))
    }
}

#[cfg(feature = "v4l2")]
fn camera(config: &mut Config) -> Box<dyn CameraBackend> {
    use argus::capture::PixelFormat;
    if !matches!(config.capture.format, PixelFormat::Mjpeg | PixelFormat::Yuyv4) {
        warn!(format = ?config.capture.format, "V4L2 capture delivers MJPEG or YUYV, using YUYV");
        config.capture.format = PixelFormat::Yuyv4;
    }
    Box::new(argus::capture::V4l2Camera::new(config.capture.max_images as u32))
}

#[cfg(not(feature = "v4l2"))]
fn camera(config: &mut Config) -> Box<dyn CameraBackend> {
    Box::new(argus::capture::SyntheticCamera::new(config.synthetic.fps))
}

#[cfg(feature = "sdl-display")]
fn surface(config: &Config) -> Result<impl PreviewSurface> {
    Ok(argus::display::Sdl2Display::new(
        &config.display.title,
        config.display.width,
        config.display.height,
    )?)
}

#[cfg(not(feature = "sdl-display"))]
fn surface(config: &Config) -> Result<impl PreviewSurface> {
    Ok(argus::display::HeadlessPreview::new(config.display.width, config.display.height))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Argus launching...");

    let path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("ARGUS_CONFIG"))
        .map(PathBuf::from);
    let mut config = Config::load(path.as_deref())?;
    let backend = camera(&mut config);
    info!(?config.capture, ?config.pipeline, "configuration loaded");

    let mut tasks = BackgroundTaskPool::start(config.pipeline.pin_threads)?;

    // Recognition
    let recognizer = match &config.replay.payload {
        Some(path) => ReplayRecognizer::from_file(path)?,
        None => ReplayRecognizer::new(None),
    };
    let engine = Arc::new(Engine::init(recognizer, &config.engine)?);
    engine.warm_up(ImageType::for_format(config.capture.format))?;

    let overlay = Arc::new(ResultOverlay::default());
    overlay.set_detect_roi(config.engine.detect_roi());

    // Consumers
    let (publisher, previews) = preview_channel();
    let sinks = RouterSinks {
        drawing: sink(
            StreamRole::Drawing,
            DrawingConsumer::new(publisher),
            config.pipeline.drawing_inline,
            &tasks.drawing,
        ),
        inference: sink(
            StreamRole::Inference,
            InferenceConsumer::new(Arc::clone(&engine), Arc::clone(&overlay)),
            config.pipeline.inference_inline,
            &tasks.inference,
        ),
    };

    let controller = CaptureController::new(backend, &config.capture, tasks.capture.handle(), sinks);

    // Session reports
    let reports = controller.reports().clone();
    let report_overlay = Arc::clone(&overlay);
    let landscape = config.capture.landscape;
    tokio::spawn(async move {
        while let Ok(report) = reports.recv_async().await {
            match report {
                SessionReport::Streaming { preview, orientation } => {
                    info!(%preview, ?orientation, "camera streaming");
                    if landscape {
                        report_overlay.set_aspect_ratio(preview.width, preview.height);
                    } else {
                        report_overlay.set_aspect_ratio(preview.height, preview.width);
                    }
                }
                SessionReport::DeviceError { code } => error!(code, "camera device error"),
                other => warn!(report = ?other, "capture session report"),
            }
        }
    });

    // Ctrl-C
    let stop = Arc::new(AtomicBool::new(false));
    let ctrl_c = Arc::clone(&stop);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                ctrl_c.store(true, Ordering::Release);
            }
            Err(err) => warn!(%err, "cannot listen for Ctrl-C"),
        }
    });

    controller.open(config.capture.preferred_width, config.capture.preferred_height)?;

    let mut surface = surface(&config)?;
    let shown = tokio::task::block_in_place(|| run_surface(&mut surface, &previews, &overlay, &stop));
    match &shown {
        Ok(shown) => info!(shown, "preview loop finished"),
        Err(err) => error!(%err, "preview loop failed"),
    }

    if let Err(err) = controller.shutdown(&mut tasks) {
        error!(%err, "shutdown incomplete");
    }
    engine.deinit()?;

    info!("Argus shutting down");
    shown?;
    Ok(())
}
