mod backend;
mod backends;
mod nms;
mod registry;
mod result;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{SceneBackend, SceneObject, StubBackend};
pub use nms::{iou, suppress_overlaps, DEFAULT_IOU_THRESHOLD};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoundingBox, DetectOptions, Detection, RawDetection};
