use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::{BoundingBox, Frame};
use crate::labels::LabelMap;

/// One box as emitted by a model, before label lookup and validation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawBox {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawBox {
    pub fn new(class_id: usize, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// Which backend implementation loads a model asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// JSON-described model with fixed predictions.
    Scripted,
    /// ONNX YOLO export run through tract (feature `backend-tract`).
    Tract,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scripted" => Ok(BackendKind::Scripted),
            "tract" | "onnx" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown model backend '{}'", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Scripted => f.write_str("scripted"),
            BackendKind::Tract => f.write_str("tract"),
        }
    }
}

/// The external model capability.
///
/// A backend owns a loaded model and knows the names of its classes. It is
/// handed a read-only frame and the session's confidence threshold and returns
/// boxes in its native output order. The `Detector` validates everything a
/// backend returns, so implementations may be sloppy about the threshold but
/// must not retain the frame beyond the call.
pub trait ModelBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class id → label mapping of the loaded model.
    fn class_names(&self) -> &LabelMap;

    /// Run the model on a frame.
    fn predict(&mut self, frame: &Frame, confidence: f32) -> Result<Vec<RawBox>>;

    /// Optional warm-up hook, run once right after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Class-agnostic greedy NMS. Leaves `boxes` sorted by descending confidence.
pub fn non_max_suppression(boxes: &mut Vec<RawBox>, iou_threshold: f32) {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..boxes.len() {
        let overlaps =
            (0..kept).any(|prev| boxes[prev].bbox.iou(&boxes[index].bbox) > iou_threshold);
        if !overlaps {
            boxes.swap(kept, index);
            kept += 1;
        }
    }
    boxes.truncate(kept);
}
