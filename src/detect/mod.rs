mod backend;
mod backends;
mod loader;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ScriptHandle, ScriptedBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use loader::{ModelLoader, SharedDetector};
pub use result::{BoundingBox, RawDetection};
