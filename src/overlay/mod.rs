//! Recognition results drawn over the preview

pub mod canvas;
pub mod transform;
pub mod view;
pub mod zone;

pub use canvas::{Canvas, DisplayList, DrawOp, PointF, RectF};
pub use transform::TransformationInfo;
pub use view::{OverlayState, OverlayStyle, ResultOverlay};
pub use zone::{RecognitionZone, ZoneClass};
