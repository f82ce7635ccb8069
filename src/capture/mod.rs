pub mod controller;
pub mod decode;
pub mod device;
pub mod frame;
pub mod gate;
pub mod refcount;
pub mod session;
pub mod sizing;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use controller::CaptureController;
pub use device::{CameraBackend, DeviceEvent, EventSender};
pub use frame::{Frame, Orientation, PixelFormat};
pub use refcount::{FrameGuard, RefCountedFrame};
pub use session::{CaptureSession, CaptureState, SessionReport};
pub use synthetic::SyntheticCamera;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;
