//! Frame annotation.
//!
//! Draws detection boxes, labels and the per-person overlap diagnostic onto a
//! copy of the frame. Text is rendered with the bundled DejaVu Sans face
//! unless a TrueType font file is configured.

use std::path::Path;

use ab_glyph::{Font, FontArc, FontVec, PxScale, ScaleFont};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::classify::{Category, ClassifiedDetection};
use crate::detect::BoundingBox;

pub const SAFE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const DIAGNOSTIC_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const PLACEHOLDER_TEXT_COLOR: Rgb<u8> = Rgb([100, 100, 100]);

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 18.0;
const TEXT_GAP: i32 = 4;
const PLACEHOLDER_ERROR_CHARS: usize = 50;

static BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

pub struct Annotator {
    font: Option<FontArc>,
    scale: PxScale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator {
    /// Annotator using the bundled font.
    pub fn new() -> Self {
        let font = match FontArc::try_from_slice(BUNDLED_FONT) {
            Ok(font) => Some(font),
            Err(err) => {
                log::error!("bundled font unusable ({}); annotations will omit text labels", err);
                None
            }
        };
        Self {
            font,
            scale: PxScale::from(LABEL_SCALE),
        }
    }

    pub fn with_font(font: FontVec) -> Self {
        Self {
            font: Some(FontArc::new(font)),
            scale: PxScale::from(LABEL_SCALE),
        }
    }

    pub fn from_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .with_context(|| format!("invalid font file {}", path.display()))?;
        Ok(Self::with_font(font))
    }

    /// Load the configured font override, falling back to the bundled font.
    pub fn from_optional_font(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::new();
        };
        match Self::from_font_file(path) {
            Ok(annotator) => annotator,
            Err(err) => {
                log::warn!("{:#}; using the bundled font", err);
                Self::new()
            }
        }
    }

    /// Render detections onto a copy of `frame`. The input is left untouched.
    pub fn annotate(&self, frame: &RgbImage, detections: &[ClassifiedDetection]) -> RgbImage {
        let mut canvas = frame.clone();

        for det in detections.iter().filter(|d| d.is_person()) {
            if !is_visible(&canvas, &det.bbox) {
                continue;
            }
            let rows = self.text_rows(det);
            let text = format!("Overlaps: {}", det.overlap_count);
            self.draw_label(&mut canvas, &text, rows.x, rows.diagnostic_y, DIAGNOSTIC_COLOR);
        }

        for det in detections {
            if !is_visible(&canvas, &det.bbox) {
                continue;
            }
            let color = color_for(det);
            draw_box(&mut canvas, &det.bbox, color);
            let rows = self.text_rows(det);
            self.draw_label(&mut canvas, &label_for(det), rows.x, rows.label_y, color);
        }
        canvas
    }

    /// Frame served while nothing has been published.
    pub fn placeholder(&self, width: u32, height: u32, last_error: Option<&str>) -> RgbImage {
        let mut canvas = RgbImage::new(width, height);
        let center_y = height as i32 / 2;
        let message = "No Video Signal";
        let (text_w, _) = self.text_extent(message);
        let x = (width as i32 - text_w as i32) / 2;
        self.draw_label(&mut canvas, message, x, center_y - self.line_height(), PLACEHOLDER_TEXT_COLOR);
        if let Some(err) = last_error {
            let truncated: String = err.chars().take(PLACEHOLDER_ERROR_CHARS).collect();
            self.draw_label(
                &mut canvas,
                &truncated,
                width as i32 / 12,
                center_y + self.line_height(),
                PLACEHOLDER_TEXT_COLOR,
            );
        }
        canvas
    }

    /// Text rows sit above the box; when the frame edge leaves no room for
    /// them they move inside it, label first.
    fn text_rows(&self, det: &ClassifiedDetection) -> TextRows {
        let step = self.line_height() + TEXT_GAP;
        let lines = if det.is_person() { 2 } else { 1 };
        let b = det.bbox;
        if b.y1 - lines * step >= 0 {
            let label_y = b.y1 - step;
            TextRows {
                x: b.x1,
                label_y,
                diagnostic_y: label_y - step,
            }
        } else {
            let inset = BOX_THICKNESS + TEXT_GAP;
            let label_y = b.y1.max(0) + inset;
            TextRows {
                x: b.x1.max(0) + inset,
                label_y,
                diagnostic_y: label_y + step,
            }
        }
    }

    /// Full ascent-to-descent height of one text line.
    fn line_height(&self) -> i32 {
        match &self.font {
            Some(font) => font.as_scaled(self.scale).height().ceil() as i32,
            None => LABEL_SCALE as i32,
        }
    }

    fn text_extent(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(self.scale, font, text),
            None => (0, LABEL_SCALE as u32),
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, text: &str, x: i32, y: i32, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let x = x.clamp(0, canvas.width().saturating_sub(1) as i32);
        let y = y.clamp(0, canvas.height().saturating_sub(1) as i32);
        draw_text_mut(canvas, color, x, y, self.scale, font, text);
    }
}

struct TextRows {
    x: i32,
    label_y: i32,
    diagnostic_y: i32,
}

/// `"{displayName} {confidence:.2f}"`, plus `" ({tier})"` for persons.
pub fn label_for(det: &ClassifiedDetection) -> String {
    let mut label = format!("{} {:.2}", det.display_name, det.confidence);
    if det.is_person() {
        label.push_str(&format!(" ({})", det.safety_tier));
    }
    label
}

pub fn color_for(det: &ClassifiedDetection) -> Rgb<u8> {
    match det.category {
        Category::Person if det.safety_tier.is_protected() => SAFE_COLOR,
        Category::Person => ALERT_COLOR,
        Category::Ppe => SAFE_COLOR,
        Category::Hazard => ALERT_COLOR,
    }
}

fn is_visible(canvas: &RgbImage, b: &BoundingBox) -> bool {
    let (w, h) = (canvas.width() as i32, canvas.height() as i32);
    w > 0 && h > 0 && b.x2 >= 0 && b.y2 >= 0 && b.x1 < w && b.y1 < h
}

/// Hollow box, clamped to the canvas.
fn draw_box(canvas: &mut RgbImage, b: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = (canvas.width() as i32, canvas.height() as i32);
    let x1 = b.x1.clamp(0, w - 1);
    let y1 = b.y1.clamp(0, h - 1);
    let x2 = b.x2.clamp(0, w - 1);
    let y2 = b.y2.clamp(0, h - 1);
    for t in 0..BOX_THICKNESS {
        let rw = x2 - x1 + 1 - 2 * t;
        let rh = y2 - y1 + 1 - 2 * t;
        if rw <= 0 || rh <= 0 {
            break;
        }
        let rect = Rect::at(x1 + t, y1 + t).of_size(rw as u32, rh as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}
