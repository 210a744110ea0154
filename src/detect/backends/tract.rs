#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::classify::overlap;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, RawDetection};

/// Candidates below this score never leave the backend. Per-class policy
/// thresholds are applied later and are all above it.
const DEFAULT_MIN_SCORE: f32 = 0.15;
const DEFAULT_NMS_IOU: f32 = 0.7;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single input of shape `[1, 3, size, size]` (RGB, 0..1) and a
/// single output of shape `[1, 4 + classes, anchors]` holding `cx, cy, w, h`
/// followed by per-class scores, which is what an Ultralytics export produces.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    input_size: u32,
    class_names: Vec<String>,
    min_score: f32,
    nms_iou: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if class_names.is_empty() {
            return Err(anyhow!("tract backend needs at least one class name"));
        }
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names,
            min_score: DEFAULT_MIN_SCORE,
            nms_iou: DEFAULT_NMS_IOU,
        })
    }

    fn build_input(&self, frame: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);
        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &RgbImage) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not [1, 4 + classes, anchors]")?;
        let channels = view.shape()[1];
        let anchors = view.shape()[2];
        if channels < 5 {
            return Err(anyhow!("model output has {} channels, expected >= 5", channels));
        }
        let classes = (channels - 4).min(self.class_names.len());
        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;

        let mut candidates: Vec<(usize, RawDetection)> = Vec::new();
        for i in 0..anchors {
            let mut best = (0usize, f32::MIN);
            for c in 0..classes {
                let score = view[[0, 4 + c, i]];
                if score > best.1 {
                    best = (c, score);
                }
            }
            if best.1 < self.min_score {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, i]],
                view[[0, 1, i]],
                view[[0, 2, i]],
                view[[0, 3, i]],
            );
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * sx).round() as i32,
                ((cy - h / 2.0) * sy).round() as i32,
                ((cx + w / 2.0) * sx).round() as i32,
                ((cy + h / 2.0) * sy).round() as i32,
            );
            candidates.push((
                best.0,
                RawDetection::new(self.class_names[best.0].clone(), best.1, bbox),
            ));
        }
        Ok(non_max_suppression(candidates, self.nms_iou))
    }
}

/// Class-aware greedy NMS, highest score first.
fn non_max_suppression(mut candidates: Vec<(usize, RawDetection)>, iou: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut kept: Vec<(usize, RawDetection)> = Vec::new();
    for (class, det) in candidates {
        let suppressed = kept
            .iter()
            .any(|(k, other)| *k == class && overlap(&other.bbox, &det.bbox, 0) > iou);
        if !suppressed {
            kept.push((class, det));
        }
    }
    kept.into_iter().map(|(_, det)| det).collect()
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_per_class() {
        let a = RawDetection::new("person", 0.9, BoundingBox::new(0, 0, 100, 100));
        let b = RawDetection::new("person", 0.8, BoundingBox::new(2, 2, 100, 100));
        let c = RawDetection::new("hardhat", 0.7, BoundingBox::new(2, 2, 100, 100));
        let kept = non_max_suppression(vec![(0, b), (0, a.clone()), (1, c.clone())], 0.7);
        assert_eq!(kept, vec![a, c]);
    }
}
