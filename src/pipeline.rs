use image::RgbImage;

use crate::annotate::Annotator;
use crate::classify::{classify, EngineConfig};
use crate::detect::DetectorBackend;
use crate::frame::FrameResult;

/// Per-frame processing: detector, then classifier, then annotator.
pub struct FramePipeline {
    engine: EngineConfig,
    annotator: Annotator,
}

impl FramePipeline {
    pub fn new(engine: EngineConfig, annotator: Annotator) -> Self {
        Self { engine, annotator }
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    /// Process one frame.
    ///
    /// A detector error degrades the frame to an unannotated passthrough with
    /// no detections; the operator still sees video.
    pub fn process(
        &self,
        detector: &mut dyn DetectorBackend,
        frame: RgbImage,
        frame_index: u64,
    ) -> FrameResult {
        let raw = match detector.detect(&frame) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("detector '{}' failed on frame {}: {:#}", detector.name(), frame_index, err);
                return FrameResult::passthrough(frame, frame_index);
            }
        };
        let detections = classify(&raw, &self.engine);
        let image = self.annotator.annotate(&frame, &detections);
        FrameResult::new(image, detections, frame_index)
    }
}
