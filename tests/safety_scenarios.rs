use image::{Rgb, RgbImage};

use ppe_sentinel::annotate::{ALERT_COLOR, SAFE_COLOR};
use ppe_sentinel::detect::ScriptedBackend;
use ppe_sentinel::{
    classify, Annotator, BoundingBox, Category, EngineConfig, FramePipeline, RawDetection,
    SafetyTier, SentinelConfig,
};

fn det(label: &str, confidence: f32, b: [i32; 4]) -> RawDetection {
    RawDetection::new(label, confidence, BoundingBox::from(b))
}

fn person() -> RawDetection {
    det("person", 0.9, [0, 0, 100, 200])
}

/// Four PPE items inside the person box, each above its class threshold and
/// overlapping the person well above 0.05 once expanded.
fn four_ppe_items() -> Vec<RawDetection> {
    vec![
        det("hardhat", 0.8, [30, 0, 70, 30]),
        det("safety_vest", 0.8, [20, 50, 80, 120]),
        det("safety_gloves", 0.8, [0, 100, 30, 140]),
        det("safety_boots", 0.8, [20, 170, 80, 200]),
    ]
}

fn run_pipeline(raw: Vec<RawDetection>) -> ppe_sentinel::FrameResult {
    let pipeline = FramePipeline::new(EngineConfig::default(), Annotator::new());
    let mut backend = ScriptedBackend::new(raw);
    let frame = RgbImage::from_pixel(120, 220, Rgb([0, 0, 0]));
    pipeline.process(&mut backend, frame, 1)
}

#[test]
fn four_qualifying_items_make_a_person_safe() {
    let mut raw = vec![person()];
    raw.extend(four_ppe_items());

    let result = run_pipeline(raw);
    assert_eq!(result.detections.len(), 5);
    let person = &result.detections[0];
    assert_eq!(person.category, Category::Person);
    assert_eq!(person.overlap_count, 4);
    assert_eq!(person.safety_tier, SafetyTier::Safe);
    assert!(result.detections[1..]
        .iter()
        .all(|d| d.category == Category::Ppe && d.safety_tier == SafetyTier::None));

    // Person's right edge, clear of every PPE box and label.
    assert_eq!(*result.image.get_pixel(100, 100), SAFE_COLOR);
}

#[test]
fn five_qualifying_items_make_a_person_fully_protected() {
    let mut raw = vec![person()];
    raw.extend(four_ppe_items());
    raw.push(det("safety_mask", 0.9, [35, 20, 65, 50]));

    let detections = classify(&raw, &EngineConfig::default());
    let person = &detections[0];
    assert_eq!(person.overlap_count, 5);
    assert_eq!(person.safety_tier, SafetyTier::FullyProtected);
    assert_eq!(person.safety_tier.as_str(), "FULLY_PROTECTED");
}

#[test]
fn person_without_ppe_is_unsafe() {
    let raw = vec![
        person(),
        // Far from the person: no overlap.
        det("hardhat", 0.9, [300, 300, 340, 330]),
        // Hazard, not PPE.
        det("api", 0.3, [10, 10, 40, 40]),
    ];

    let result = run_pipeline(raw);
    let person = &result.detections[0];
    assert_eq!(person.overlap_count, 0);
    assert_eq!(person.safety_tier, SafetyTier::Unsafe);

    let fire = &result.detections[2];
    assert_eq!(fire.display_name, "FIRE");
    assert_eq!(fire.category, Category::Hazard);

    assert_eq!(*result.image.get_pixel(100, 160), ALERT_COLOR);
}

#[test]
fn below_threshold_ppe_does_not_protect() {
    let mut raw = vec![person()];
    raw.extend(four_ppe_items());
    // safety_vest threshold is 0.58.
    raw[2] = det("safety_vest", 0.57, [20, 50, 80, 120]);
    // safety_mask threshold is 0.70.
    raw.push(det("safety_mask", 0.69, [35, 20, 65, 50]));

    let detections = classify(&raw, &EngineConfig::default());
    assert_eq!(detections.len(), 4);
    assert_eq!(detections[0].overlap_count, 3);
    assert_eq!(detections[0].safety_tier, SafetyTier::Safe);
}

#[test]
fn detections_feed_serializes_wire_fields() {
    let result = run_pipeline(vec![person(), det("asap", 0.75, [0, 0, 10, 10])]);
    let value = serde_json::to_value(&result.detections).unwrap();
    assert_eq!(value[0]["displayName"], "PERSON");
    assert_eq!(value[0]["rawLabel"], "person");
    assert_eq!(value[0]["safetyTier"], "UNSAFE");
    assert_eq!(value[0]["category"], "PERSON");
    assert_eq!(value[0]["box"], serde_json::json!([0, 0, 100, 200]));
    assert_eq!(value[1]["displayName"], "SMOKE");
    assert_eq!(value[1]["safetyTier"], "NONE");
    assert_eq!(value[1]["overlapCount"], 0);
}

#[test]
fn default_configuration_labels_hazards() {
    let config = SentinelConfig::default();
    let annotator = Annotator::from_optional_font(config.font_path.as_deref());
    let pipeline = FramePipeline::new(config.engine, annotator);
    let mut backend = ScriptedBackend::new(vec![det("api", 0.9, [20, 120, 120, 190])]);
    let result = pipeline.process(&mut backend, RgbImage::from_pixel(200, 200, Rgb([0, 0, 0])), 1);

    assert_eq!(result.detections.len(), 1);
    let label_pixels = (0..200u32)
        .flat_map(|x| (0..118u32).map(move |y| (x, y)))
        .filter(|&(x, y)| result.image.get_pixel(x, y)[0] > 0)
        .count();
    assert!(label_pixels > 0, "FIRE label was not rendered above its box");
}
