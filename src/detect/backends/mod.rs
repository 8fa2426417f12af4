pub mod scene;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scene::{SceneBackend, SceneObject};
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
