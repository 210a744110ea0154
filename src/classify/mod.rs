//! Detection classification.
//!
//! Turns one frame's raw detector output into display-ready detections:
//!
//! 1. drop malformed detections and those under their class threshold,
//! 2. resolve display names (aliases, otherwise upper-case),
//! 3. split into persons, PPE items and everything else (hazards),
//! 4. give every person a safety tier from how many PPE boxes overlap it.
//!
//! Classification never fails for a whole frame. A bad detection is dropped
//! and the rest of the frame is still classified.

mod config;
mod overlap;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, RawDetection};

pub use config::{EngineConfig, PERSON_CLASS};
pub use overlap::overlap;

use config::normalize_label;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Person,
    Ppe,
    Hazard,
}

/// Safety tier of a detected person. Non-person detections carry `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyTier {
    #[default]
    None,
    Unsafe,
    Safe,
    FullyProtected,
}

impl SafetyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyTier::None => "NONE",
            SafetyTier::Unsafe => "UNSAFE",
            SafetyTier::Safe => "SAFE",
            SafetyTier::FullyProtected => "FULLY_PROTECTED",
        }
    }

    /// SAFE or FULLY_PROTECTED.
    pub fn is_protected(&self) -> bool {
        matches!(self, SafetyTier::Safe | SafetyTier::FullyProtected)
    }
}

impl fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedDetection {
    pub display_name: String,
    /// Lower-cased model label, kept even when the display name is an alias.
    pub raw_label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub category: Category,
    pub safety_tier: SafetyTier,
    /// Qualifying PPE overlaps. Always 0 for non-person detections.
    pub overlap_count: usize,
}

impl ClassifiedDetection {
    pub fn is_person(&self) -> bool {
        self.category == Category::Person
    }
}

/// Map an overlap count to a tier using the configured boundaries.
pub fn safety_tier(overlap_count: usize, config: &EngineConfig) -> SafetyTier {
    if overlap_count >= config.fully_protected_overlaps {
        SafetyTier::FullyProtected
    } else if overlap_count >= config.safe_overlaps {
        SafetyTier::Safe
    } else {
        SafetyTier::Unsafe
    }
}

/// Classify one frame's detections. Output keeps the input's relative order.
pub fn classify(raw: &[RawDetection], config: &EngineConfig) -> Vec<ClassifiedDetection> {
    let mut out: Vec<ClassifiedDetection> = raw
        .iter()
        .filter_map(|det| admit(det, config))
        .collect();

    let ppe_boxes: Vec<BoundingBox> = out
        .iter()
        .filter(|d| d.category == Category::Ppe)
        .map(|d| d.bbox)
        .collect();

    for person in out.iter_mut().filter(|d| d.category == Category::Person) {
        let count = ppe_boxes
            .iter()
            .filter(|ppe| {
                overlap(&person.bbox, ppe, config.box_expansion_margin) >= config.overlap_threshold
            })
            .count();
        person.overlap_count = count;
        person.safety_tier = safety_tier(count, config);
    }
    out
}

/// Apply the per-detection filters and build the unscored detection.
fn admit(det: &RawDetection, config: &EngineConfig) -> Option<ClassifiedDetection> {
    if !det.confidence.is_finite() || det.bbox.is_degenerate() {
        log::trace!("dropping malformed detection '{}'", det.label);
        return None;
    }
    let label = normalize_label(&det.label);
    if label.is_empty() || det.confidence < config.threshold_for(&label) {
        return None;
    }
    let category = if label == PERSON_CLASS {
        Category::Person
    } else if config.is_ppe(&label) {
        Category::Ppe
    } else {
        Category::Hazard
    };
    Some(ClassifiedDetection {
        display_name: config.display_name(&label),
        raw_label: label,
        confidence: det.confidence,
        bbox: det.bbox,
        category,
        safety_tier: if category == Category::Person {
            SafetyTier::Unsafe
        } else {
            SafetyTier::None
        },
        overlap_count: 0,
    })
}
