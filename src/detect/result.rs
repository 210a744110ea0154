use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates.
///
/// Coordinates are inclusive pixel indices, the convention the detector uses:
/// a box with `x1 == x2` is one pixel wide for area purposes, but is still
/// rejected as degenerate by the classifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// True when the box has no positive extent on either axis.
    pub fn is_degenerate(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Grow the box outward by `margin` pixels on all four sides.
    pub fn expanded(&self, margin: i32) -> Self {
        Self {
            x1: self.x1.saturating_sub(margin),
            y1: self.y1.saturating_sub(margin),
            x2: self.x2.saturating_add(margin),
            y2: self.y2.saturating_add(margin),
        }
    }

    /// Area under the inclusive-pixel convention (`(x2 - x1 + 1) * (y2 - y1 + 1)`).
    pub fn inclusive_area(&self) -> f64 {
        let w = (self.x2 as i64 - self.x1 as i64 + 1).max(0);
        let h = (self.y2 as i64 - self.y1 as i64 + 1).max(0);
        (w * h) as f64
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One detection as produced by a detector backend, before any policy is applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Model class name (e.g. "person", "hardhat", "api").
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_serializes_as_array() {
        let det = RawDetection::new("person", 0.9, BoundingBox::new(1, 2, 3, 4));
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["box"], serde_json::json!([1, 2, 3, 4]));
        let back: RawDetection = serde_json::from_value(json).unwrap();
        assert_eq!(back, det);
    }

    #[test]
    fn degenerate_boxes() {
        assert!(BoundingBox::new(5, 5, 5, 10).is_degenerate());
        assert!(BoundingBox::new(5, 10, 9, 2).is_degenerate());
        assert!(!BoundingBox::new(0, 0, 1, 1).is_degenerate());
    }

    #[test]
    fn expansion_grows_every_side() {
        let b = BoundingBox::new(10, 20, 30, 40).expanded(5);
        assert_eq!(b, BoundingBox::new(5, 15, 35, 45));
        assert_eq!(BoundingBox::new(0, 0, 9, 9).inclusive_area(), 100.0);
    }
}
