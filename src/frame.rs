//! Frame results and their publication.
//!
//! - `FrameResult`: one processed frame, the annotated image plus the exact
//!   detections drawn onto it. Immutable once built.
//! - `FrameCell`: single-writer / multi-reader slot holding the latest result.
//!
//! The image and its detections travel together in one `Arc`, so a reader can
//! never pair a new image with old detections or the reverse. Publishing swaps
//! the reference; a published result is never modified in place.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use image::RgbImage;

use crate::classify::ClassifiedDetection;

// ----------------------------------------------------------------------------
// FrameResult
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct FrameResult {
    /// Annotated image, same dimensions as the source frame.
    pub image: RgbImage,
    pub detections: Vec<ClassifiedDetection>,
    /// Session frame counter at capture (1-based).
    pub frame_index: u64,
    pub captured_at: SystemTime,
}

impl FrameResult {
    pub fn new(image: RgbImage, detections: Vec<ClassifiedDetection>, frame_index: u64) -> Self {
        Self {
            image,
            detections,
            frame_index,
            captured_at: SystemTime::now(),
        }
    }

    /// The raw frame with no overlay, used when detection failed.
    pub fn passthrough(frame: RgbImage, frame_index: u64) -> Self {
        Self::new(frame, Vec::new(), frame_index)
    }
}

// ----------------------------------------------------------------------------
// FrameCell
// ----------------------------------------------------------------------------

/// Latest published frame result.
///
/// Readers clone the `Arc` under a read lock and never copy pixels; the write
/// lock is held only for the pointer swap.
#[derive(Default)]
pub struct FrameCell {
    latest: RwLock<Option<Arc<FrameResult>>>,
}

impl FrameCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest result.
    pub fn publish(&self, result: FrameResult) {
        let next = Arc::new(result);
        match self.latest.write() {
            Ok(mut slot) => *slot = Some(next),
            Err(poisoned) => *poisoned.into_inner() = Some(next),
        }
    }

    pub fn latest(&self) -> Option<Arc<FrameResult>> {
        match self.latest.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        match self.latest.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.latest().is_none()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_replaces_reference_without_touching_readers() {
        let cell = FrameCell::new();
        assert!(cell.is_empty());

        cell.publish(FrameResult::passthrough(RgbImage::new(4, 4), 1));
        let first = cell.latest().unwrap();

        cell.publish(FrameResult::passthrough(RgbImage::new(8, 8), 2));
        let second = cell.latest().unwrap();

        assert_eq!(first.frame_index, 1);
        assert_eq!(first.image.dimensions(), (4, 4));
        assert_eq!(second.frame_index, 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn clear_empties_the_cell() {
        let cell = FrameCell::new();
        cell.publish(FrameResult::passthrough(RgbImage::new(2, 2), 1));
        cell.clear();
        assert!(cell.latest().is_none());
    }

    #[test]
    fn concurrent_readers_see_consistent_pairs() {
        use crate::classify::{Category, SafetyTier};
        use crate::detect::BoundingBox;

        let cell = Arc::new(FrameCell::new());
        let writer = {
            let cell = cell.clone();
            std::thread::spawn(move || {
                for i in 1..=200u32 {
                    let det = ClassifiedDetection {
                        display_name: "CRACK".to_string(),
                        raw_label: "crack".to_string(),
                        confidence: 0.9,
                        bbox: BoundingBox::new(0, 0, i as i32, i as i32),
                        category: Category::Hazard,
                        safety_tier: SafetyTier::None,
                        overlap_count: 0,
                    };
                    cell.publish(FrameResult::new(RgbImage::new(i, 1), vec![det], i as u64));
                }
            })
        };
        for _ in 0..500 {
            if let Some(result) = cell.latest() {
                let width = result.image.width() as i32;
                assert_eq!(result.detections[0].bbox.x2, width);
                assert_eq!(result.frame_index, width as u64);
            }
        }
        writer.join().unwrap();
    }
}
