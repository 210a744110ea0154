use crate::detect::BoundingBox;

const IOU_EPSILON: f64 = 1e-6;

/// Overlap score between a person box and a PPE box.
///
/// The PPE box is first expanded by `margin` pixels on every side: PPE boxes
/// hug the worn item while person boxes are loose, so the expansion gives a
/// more forgiving match region. The score is then plain IoU over inclusive
/// pixel coordinates, with a small epsilon in the denominator so that two
/// degenerate boxes score 0 instead of dividing by zero.
///
/// The margin is a fixed pixel count and does not scale with frame
/// resolution. A margin tuned on one camera is looser on a low-resolution
/// stream and tighter on a high-resolution one.
pub fn overlap(person: &BoundingBox, ppe: &BoundingBox, margin: i32) -> f32 {
    let ppe = ppe.expanded(margin);

    let xa = person.x1.max(ppe.x1) as i64;
    let ya = person.y1.max(ppe.y1) as i64;
    let xb = person.x2.min(ppe.x2) as i64;
    let yb = person.y2.min(ppe.y2) as i64;

    let inter = ((xb - xa + 1).max(0) * (yb - ya + 1).max(0)) as f64;
    let union = person.inclusive_area() + ppe.inclusive_area() - inter;
    (inter / (union + IOU_EPSILON)) as f32
}
