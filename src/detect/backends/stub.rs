use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Stub backend used when no model is configured. Never detects anything,
/// so frames pass through unannotated.
#[derive(Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<RawDetection>> {
        Ok(Vec::new())
    }
}
