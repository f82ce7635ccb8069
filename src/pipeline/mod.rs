pub mod lane;
pub mod pool;
pub mod router;
pub mod tasks;

pub use lane::{ConsumerLane, InlineSink};
pub use pool::{StreamId, StreamPool, StreamRole};
pub use router::{FrameConsumer, FrameRouter, FrameSink, RouterSinks};
pub use tasks::{BackgroundTask, BackgroundTaskPool, TaskHandle};
