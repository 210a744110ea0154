use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const PERSON_CLASS: &str = "person";

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.05;
const DEFAULT_FULLY_PROTECTED_OVERLAPS: usize = 5;
const DEFAULT_SAFE_OVERLAPS: usize = 2;
const DEFAULT_BOX_EXPANSION_MARGIN: i32 = 5;

const DEFAULT_CLASS_THRESHOLDS: &[(&str, f32)] = &[
    ("person", 0.46),
    ("hardhat", 0.50),
    ("safety_boots", 0.48),
    ("safety_gloves", 0.48),
    ("safety_mask", 0.70),
    ("safety_vest", 0.58),
    ("gas", 0.82),
    ("leak", 0.80),
    ("crack", 0.76),
    ("damage", 0.67),
    ("api", 0.20),
    ("asap", 0.70),
];

const DEFAULT_PPE_CLASSES: &[&str] = &[
    "hardhat",
    "safety_boots",
    "safety_gloves",
    "safety_mask",
    "safety_vest",
];

/// The model's fire and smoke classes carry opaque internal names.
const DEFAULT_DISPLAY_ALIASES: &[(&str, &str)] = &[("api", "FIRE"), ("asap", "SMOKE")];

/// Classification policy. Immutable once a session is running.
///
/// Class names are matched case-insensitively; `validated` lower-cases every
/// key so lookups can assume lower-case labels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum confidence per class. Detections below it are discarded.
    pub class_thresholds: BTreeMap<String, f32>,
    /// Threshold for classes missing from `class_thresholds`.
    pub default_threshold: f32,
    /// Classes counted as protective equipment when scoring a person.
    pub ppe_classes: BTreeSet<String>,
    /// Display names that replace the upper-cased class name.
    pub display_aliases: BTreeMap<String, String>,
    /// Minimum overlap score for a PPE item to count toward a person.
    pub overlap_threshold: f32,
    pub fully_protected_overlaps: usize,
    pub safe_overlaps: usize,
    /// Pixels added to each side of a PPE box before scoring.
    pub box_expansion_margin: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            class_thresholds: DEFAULT_CLASS_THRESHOLDS
                .iter()
                .map(|(label, t)| (label.to_string(), *t))
                .collect(),
            default_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            ppe_classes: DEFAULT_PPE_CLASSES.iter().map(|c| c.to_string()).collect(),
            display_aliases: DEFAULT_DISPLAY_ALIASES
                .iter()
                .map(|(label, name)| (label.to_string(), name.to_string()))
                .collect(),
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            fully_protected_overlaps: DEFAULT_FULLY_PROTECTED_OVERLAPS,
            safe_overlaps: DEFAULT_SAFE_OVERLAPS,
            box_expansion_margin: DEFAULT_BOX_EXPANSION_MARGIN,
        }
    }
}

impl EngineConfig {
    /// Normalize class names and check value ranges.
    pub fn validated(mut self) -> Result<Self> {
        self.class_thresholds = self
            .class_thresholds
            .into_iter()
            .map(|(label, t)| (normalize_label(&label), t))
            .collect();
        self.ppe_classes = self.ppe_classes.iter().map(|c| normalize_label(c)).collect();
        self.display_aliases = self
            .display_aliases
            .into_iter()
            .map(|(label, name)| (normalize_label(&label), name))
            .collect();

        for (label, t) in &self.class_thresholds {
            check_unit_interval(&format!("threshold for '{}'", label), *t)?;
        }
        check_unit_interval("default_threshold", self.default_threshold)?;
        check_unit_interval("overlap_threshold", self.overlap_threshold)?;
        if self.ppe_classes.contains(PERSON_CLASS) {
            return Err(anyhow!("'{}' cannot be a PPE class", PERSON_CLASS));
        }
        if self.safe_overlaps > self.fully_protected_overlaps {
            return Err(anyhow!(
                "safe_overlaps ({}) must not exceed fully_protected_overlaps ({})",
                self.safe_overlaps,
                self.fully_protected_overlaps
            ));
        }
        if self.box_expansion_margin < 0 {
            return Err(anyhow!("box_expansion_margin must be >= 0"));
        }
        Ok(self)
    }

    /// Set one class threshold.
    pub fn with_threshold(mut self, label: &str, threshold: f32) -> Self {
        self.class_thresholds
            .insert(normalize_label(label), threshold);
        self
    }

    pub fn threshold_for(&self, label: &str) -> f32 {
        self.class_thresholds
            .get(label)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn is_ppe(&self, label: &str) -> bool {
        self.ppe_classes.contains(label)
    }

    pub fn display_name(&self, label: &str) -> String {
        self.display_aliases
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.to_uppercase())
    }
}

pub(crate) fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}
