//! Burns detection boxes and captions into a copy of the frame.
//!
//! Exactly one box is drawn per detection record; boxes are clamped into the
//! image so none is silently dropped. Each box carries a chip captioned with
//! the label and the two-decimal confidence.

use std::path::Path;
use std::sync::OnceLock;

use ab_glyph::FontVec;
use anyhow::{anyhow, Result};
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::frame::{DetectionRecord, Frame};

const PALETTE: [[u8; 3]; 20] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [82, 0, 133],
    [203, 56, 255],
    [255, 149, 200],
    [255, 55, 199],
];

const SYSTEM_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Caption width per character when no font is loaded, in thickness units.
const FALLBACK_CHAR_WIDTH: u32 = 3;

/// Box colour for a class id.
pub fn palette_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Chip caption for a detection, e.g. `Scab 0.81`.
pub fn caption(detection: &DetectionRecord) -> String {
    format!("{} {:.2}", detection.label(), detection.confidence())
}

/// Line thickness scaled with the frame: 1px up to 320px, +1px per extra 320px.
fn thickness_for(frame: &Frame) -> u32 {
    (frame.width().max(frame.height()) / 320).max(1)
}

/// Black on light chips, white on dark ones.
fn text_color(background: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = background.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 150.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

/// Draws boxes with captioned chips. Without a font the chip is still sized
/// to the caption, only the glyphs are missing.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Annotator without text rendering.
    pub fn plain() -> Self {
        Self { font: None }
    }

    pub fn with_font_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| anyhow!("failed to read font {}: {}", path.display(), e))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|_| anyhow!("failed to parse font {}", path.display()))?;
        Ok(Self { font: Some(font) })
    }

    /// First loadable font from the usual system locations, or `plain()`.
    pub fn with_system_font() -> Self {
        for path in SYSTEM_FONTS {
            if let Ok(annotator) = Self::with_font_path(Path::new(path)) {
                log::debug!("annotate: caption font {}", path);
                return annotator;
            }
        }
        log::warn!("annotate: no system font found, captions are drawn without text");
        Self::plain()
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Render `detections` onto a copy of `frame`.
    pub fn render(&self, frame: &Frame, detections: &[DetectionRecord]) -> Frame {
        let mut annotated = frame.clone();
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return annotated;
        }
        let thickness = thickness_for(frame);
        let font_scale = 12.0 * thickness as f32;
        let padding = thickness + 1;

        for detection in detections {
            let bbox = detection.bbox().clamp_to(width, height);
            let color = palette_color(detection.class_id());
            let left = bbox.x1.round() as i32;
            let top = bbox.y1.round() as i32;
            // Corner coordinates are inclusive.
            let box_w = (bbox.x2.round() as i32 - left).max(0) as u32 + 1;
            let box_h = (bbox.y2.round() as i32 - top).max(0) as u32 + 1;

            let canvas = annotated.image_mut();
            for t in 0..thickness {
                let inner_w = box_w.saturating_sub(2 * t);
                let inner_h = box_h.saturating_sub(2 * t);
                if inner_w == 0 || inner_h == 0 {
                    break;
                }
                let rect = Rect::at(left + t as i32, top + t as i32).of_size(inner_w, inner_h);
                draw_hollow_rect_mut(canvas, rect, color);
            }

            let text = caption(detection);
            let (text_w, text_h) = match &self.font {
                Some(font) => text_size(font_scale, font, &text),
                None => (
                    text.chars().count() as u32 * FALLBACK_CHAR_WIDTH * thickness,
                    4 * thickness,
                ),
            };
            let room = width - left as u32;
            let chip_w = (text_w + 2 * padding).clamp(1, room);
            let chip_h = text_h + 2 * padding;
            let chip_top = if top >= chip_h as i32 {
                top - chip_h as i32
            } else {
                top
            };
            draw_filled_rect_mut(
                canvas,
                Rect::at(left, chip_top).of_size(chip_w, chip_h),
                color,
            );
            if let Some(font) = &self.font {
                draw_text_mut(
                    canvas,
                    text_color(color),
                    left + padding as i32,
                    chip_top + padding as i32,
                    font_scale,
                    font,
                    &text,
                );
            }
        }

        annotated
    }
}

/// Render with the shared annotator, loaded once with the first system font found.
pub fn render(frame: &Frame, detections: &[DetectionRecord]) -> Frame {
    static SHARED: OnceLock<Annotator> = OnceLock::new();
    SHARED
        .get_or_init(Annotator::with_system_font)
        .render(frame, detections)
}
