use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawDetection;

/// Detector backend trait.
///
/// The backend is an opaque classifier: it receives one decoded RGB frame and
/// returns boxes, labels and confidences in that frame's pixel space. Policy
/// (confidence thresholds, PPE matching, display names) is applied later by
/// the classifier, so backends should report everything they see.
///
/// Only the capture worker of the active session calls `detect`; backends do
/// not need to be re-entrant.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// An `Err` is a model failure for this frame only. The caller degrades the
    /// frame to an unannotated passthrough and keeps the session running.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once right after the model is loaded.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
