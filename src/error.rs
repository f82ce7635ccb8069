//! Error taxonomy for the capture, routing and recognition layers

use std::time::Duration;

use thiserror::Error;

use crate::capture::frame::PixelFormat;
use crate::capture::session::CaptureState;

/// Misuse of a reference-counted frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame buffer was already released")]
    Released,
    #[error("frame accessed with {refs} outstanding references")]
    InvalidState { refs: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("timed out after {0:?} waiting for the open/close permit")]
    Timeout(Duration),
}

/// Errors reported by a camera backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("camera access failed: {0}")]
    Access(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("backend is closed")]
    Closed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("all {depth} buffers are in flight")]
    Exhausted { depth: usize },
    #[error("stream pool is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("background task is not running")]
    Stopped,
    #[error("failed to spawn background thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("camera permission not granted")]
    PermissionDenied,
    #[error("time out waiting to lock camera opening/closing ({0:?})")]
    LockTimeout(Duration),
    #[error("cannot {op} while {from:?}")]
    InvalidTransition { from: CaptureState, op: &'static str },
    #[error("no usable camera found")]
    NoCamera,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("capture context did not answer within {0:?}")]
    ReplyTimeout(Duration),
}

impl From<GateError> for SessionError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Timeout(waited) => SessionError::LockTimeout(waited),
        }
    }
}

/// Frame that cannot be turned into a preview image
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{format:?} frame carries {got} planes")]
    MissingPlanes { format: PixelFormat, got: usize },
    #[error("empty {width}x{height} frame")]
    EmptyFrame { width: u32, height: u32 },
    #[error("plane data shorter than its geometry")]
    Truncated,
    #[error("jpeg decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),
    #[error("unsupported jpeg layout {0}")]
    UnsupportedJpeg(String),
}

/// Malformed recognition payload
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid result json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("warpedBox must hold 8 numbers, got {0}")]
    WarpedBox(usize),
    #[error("confidences must hold 2 numbers, got {0}")]
    Confidences(usize),
    #[error("unknown zone class {0}")]
    UnknownClass(i32),
    #[error("confidence {0} outside [0, 100]")]
    ConfidenceRange(f32),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine call failed (code {code}): {phrase}")]
    Failed { code: i32, phrase: String },
    #[error("engine is not initialized")]
    NotInitialized,
    #[error("frame cannot be handed to the engine: {0}")]
    UnsupportedFrame(String),
    #[error("frame conversion for the engine failed: {0}")]
    Convert(#[from] DecodeError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Preview surface failures
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display backend: {0}")]
    Backend(String),
    #[error("preview {width}x{height} does not match its {len} byte buffer")]
    BadImage { width: u32, height: u32, len: usize },
}

/// Configuration problems caught before anything starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Display(#[from] DisplayError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
