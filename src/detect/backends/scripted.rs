use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::detect::backend::{ModelBackend, RawBox};
use crate::frame::{BoundingBox, Frame};
use crate::labels::LabelMap;

/// Shared count of `predict` calls made on a backend.
#[derive(Clone, Debug, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Deserialize)]
struct ScriptFile {
    labels: Vec<String>,
    #[serde(default)]
    boxes: Vec<ScriptBox>,
}

#[derive(Debug, Deserialize)]
struct ScriptBox {
    class_id: usize,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

/// Model with fixed predictions, described by a JSON file.
///
/// ```json
/// { "labels": ["Phytophthora", "Scab"],
///   "boxes": [{ "class_id": 1, "confidence": 0.81, "x1": 10, "y1": 12, "x2": 90, "y2": 80 }] }
/// ```
///
/// Every frame yields the same boxes (pixel coordinates), filtered by the
/// requested confidence like a real model would.
pub struct ScriptedBackend {
    labels: LabelMap,
    boxes: Vec<RawBox>,
    honor_threshold: bool,
    calls: CallCounter,
}

impl ScriptedBackend {
    pub fn new(labels: LabelMap, boxes: Vec<RawBox>) -> Self {
        Self {
            labels,
            boxes,
            honor_threshold: true,
            calls: CallCounter::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read model {}: {}", path.display(), e))?;
        let script: ScriptFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("corrupt model {}: {}", path.display(), e))?;
        if script.labels.is_empty() {
            return Err(anyhow!("model {} declares no labels", path.display()));
        }
        let boxes = script
            .boxes
            .into_iter()
            .map(|b| {
                RawBox::new(
                    b.class_id,
                    b.confidence,
                    BoundingBox::new(b.x1, b.y1, b.x2, b.y2),
                )
            })
            .collect();
        Ok(Self::new(LabelMap::new(script.labels), boxes))
    }

    /// Return every scripted box regardless of the requested confidence.
    pub fn ignoring_threshold(mut self) -> Self {
        self.honor_threshold = false;
        self
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = labels;
        self
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn class_names(&self) -> &LabelMap {
        &self.labels
    }

    fn predict(&mut self, _frame: &Frame, confidence: f32) -> Result<Vec<RawBox>> {
        self.calls.bump();
        Ok(self
            .boxes
            .iter()
            .filter(|b| !self.honor_threshold || b.confidence >= confidence)
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn frame() -> Frame {
        Frame::from_rgb(4, 4, vec![0u8; 48]).unwrap()
    }

    #[test]
    fn scripted_backend_filters_and_counts_calls() -> Result<()> {
        let mut backend = ScriptedBackend::new(
            LabelMap::new(["Phytophthora", "Scab"]),
            vec![
                RawBox::new(1, 0.81, BoundingBox::new(0.0, 0.0, 2.0, 2.0)),
                RawBox::new(0, 0.30, BoundingBox::new(1.0, 1.0, 3.0, 3.0)),
            ],
        );
        let counter = backend.call_counter();

        assert_eq!(backend.predict(&frame(), 0.25)?.len(), 2);
        assert_eq!(backend.predict(&frame(), 0.5)?.len(), 1);
        assert_eq!(counter.get(), 2);
        Ok(())
    }

    #[test]
    fn loads_script_from_json() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{"labels": ["Scab"], "boxes": [{{"class_id": 0, "confidence": 0.7, "x1": 1, "y1": 1, "x2": 3, "y2": 3}}]}}"#
        )?;
        let mut backend = ScriptedBackend::from_file(file.path())?;
        assert_eq!(backend.class_names().get(0), "Scab");
        assert_eq!(backend.predict(&frame(), 0.5)?.len(), 1);
        Ok(())
    }

    #[test]
    fn corrupt_script_is_rejected() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "not json")?;
        assert!(ScriptedBackend::from_file(file.path()).is_err());
        Ok(())
    }
}
