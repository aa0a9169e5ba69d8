//! Frames and detection records.
//!
//! - `Frame`: owned RGB8 pixel buffer. Cloning copies the pixels, so a history
//!   snapshot never aliases a buffer the session later reuses.
//! - `DetectionRecord`: one recognised object (label, confidence, box). Immutable.
//! - `FrameResult`: raw frame, annotated frame and the ordered detection records.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use serde::Serialize;

use crate::error::DetectError;
use crate::ingest::normalize::{normalize_to_rgb, PixelFormat};

/// Which input mode produced a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SourceKind {
    Image,
    Video,
    Camera,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Image => "image",
            SourceKind::Video => "video",
            SourceKind::Camera => "camera",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Frame: owned RGB pixel buffer
// ----------------------------------------------------------------------------

#[derive(Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Build a frame from tightly packed RGB24 pixels.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, DetectError> {
        let expected = (width as usize) * (height as usize) * 3;
        let got = pixels.len();
        RgbImage::from_raw(width, height, pixels)
            .map(Self::new)
            .ok_or_else(|| {
                DetectError::invalid(format!(
                    "RGB frame {}x{} needs {} bytes, got {}",
                    width, height, expected, got
                ))
            })
    }

    /// Build a frame from device-native pixels (RGB24, NV12 or YUYV).
    pub fn from_raw(
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, DetectError> {
        let rgb = normalize_to_rgb(pixels, width, height, format)
            .map_err(|e| DetectError::invalid(e.to_string()))?;
        Self::from_rgb(width, height, rgb)
    }

    /// Decode an image file (jpg/png) into an RGB frame.
    pub fn open(path: &Path) -> Result<Self, DetectError> {
        let image = image::open(path).map_err(|e| {
            DetectError::source_unavailable(format!("{}: {}", path.display(), e))
        })?;
        Ok(Self::new(image.to_rgb8()))
    }

    /// Decode an in-memory encoded image (an upload).
    pub fn decode(bytes: &[u8]) -> Result<Self, DetectError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| DetectError::source_unavailable(format!("undecodable image: {}", e)))?;
        Ok(Self::new(image.to_rgb8()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Row-major RGB24 bytes.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub(crate) fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Write the frame to disk; the format follows the file extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.image
            .save(path)
            .with_context(|| format!("writing frame to {}", path.display()))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Detection records
// ----------------------------------------------------------------------------

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left, `(x2, y2)` bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Clamp the box into a `width x height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        Self {
            x1: self.x1.clamp(0.0, max_x),
            y1: self.y1.clamp(0.0, max_y),
            x2: self.x2.clamp(0.0, max_x),
            y2: self.y2.clamp(0.0, max_y),
        }
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let union = self.area() + other.area() - self.intersection_area(other);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / union
    }
}

/// One recognised object instance within a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionRecord {
    source_kind: SourceKind,
    class_id: usize,
    label: String,
    confidence: f32,
    bbox: BoundingBox,
}

impl DetectionRecord {
    pub fn new(
        source_kind: SourceKind,
        class_id: usize,
        label: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Self {
        Self {
            source_kind,
            class_id,
            label: label.into(),
            confidence,
            bbox,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }
}

/// Output of one detection pass.
#[derive(Clone, Debug)]
pub struct FrameResult {
    source_kind: SourceKind,
    raw_frame: Frame,
    annotated_frame: Frame,
    detections: Vec<DetectionRecord>,
}

impl FrameResult {
    pub(crate) fn new(
        source_kind: SourceKind,
        raw_frame: Frame,
        annotated_frame: Frame,
        detections: Vec<DetectionRecord>,
    ) -> Self {
        Self {
            source_kind,
            raw_frame,
            annotated_frame,
            detections,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn raw_frame(&self) -> &Frame {
        &self.raw_frame
    }

    pub fn annotated_frame(&self) -> &Frame {
        &self.annotated_frame
    }

    /// Records in the model's native output order.
    pub fn detections(&self) -> &[DetectionRecord] {
        &self.detections
    }

    pub fn labels(&self) -> Vec<&str> {
        self.detections.iter().map(|d| d.label()).collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
