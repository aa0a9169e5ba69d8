use std::path::Path;

use anyhow::{anyhow, Result};

use crate::annotate;
use crate::detect::backend::{BackendKind, ModelBackend, RawBox};
use crate::detect::backends::ScriptedBackend;
use crate::error::{validate_threshold, DetectError};
use crate::frame::{DetectionRecord, Frame, FrameResult, SourceKind};
use crate::labels::{self, LabelDescriptions, LabelMap, LegendEntry};

/// Load-time knobs shared by every backend.
#[derive(Clone, Debug)]
pub struct DetectorOptions {
    /// Square model input side in pixels.
    pub input_size: u32,
    /// Overlap above which NMS suppresses the weaker box.
    pub iou_threshold: f32,
    /// Replaces the class names the model ships with.
    pub class_names: Option<LabelMap>,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: 320,
            iou_threshold: 0.45,
            class_names: None,
        }
    }
}

enum ModelState {
    Ready(Box<dyn ModelBackend>),
    Unavailable(String),
}

/// Wraps a loaded model and turns its raw output into validated detection records.
///
/// Availability is decided once at construction. A degraded detector answers
/// every `detect` with `ModelUnavailable` and never retries the load.
pub struct Detector {
    state: ModelState,
}

impl Detector {
    pub fn from_backend(backend: Box<dyn ModelBackend>) -> Self {
        Self {
            state: ModelState::Ready(backend),
        }
    }

    /// Load a model, failing with `ModelUnavailable` when the asset is missing or corrupt.
    pub fn load(
        path: &Path,
        kind: BackendKind,
        options: &DetectorOptions,
    ) -> Result<Self, DetectError> {
        let mut backend = load_backend(path, kind, options)
            .map_err(|e| DetectError::ModelUnavailable(format!("{:#}", e)))?;
        backend
            .warm_up()
            .map_err(|e| DetectError::ModelUnavailable(format!("warm-up failed: {:#}", e)))?;
        log::info!(
            "model loaded: {} ({} backend, {} classes)",
            path.display(),
            backend.name(),
            backend.class_names().len()
        );
        Ok(Self::from_backend(backend))
    }

    /// Like `load`, but keeps a degraded detector when loading fails.
    pub fn open(path: &Path, kind: BackendKind, options: &DetectorOptions) -> Self {
        match Self::load(path, kind, options) {
            Ok(detector) => detector,
            Err(err) => {
                log::warn!("detection disabled: {}", err);
                Self {
                    state: ModelState::Unavailable(err.to_string()),
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn load_error(&self) -> Option<&str> {
        match &self.state {
            ModelState::Ready(_) => None,
            ModelState::Unavailable(msg) => Some(msg),
        }
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        match &self.state {
            ModelState::Ready(backend) => Some(backend.name()),
            ModelState::Unavailable(_) => None,
        }
    }

    /// Class names the model recognises; `None` when the model is unavailable.
    pub fn labels(&self) -> Option<&LabelMap> {
        match &self.state {
            ModelState::Ready(backend) => Some(backend.class_names()),
            ModelState::Unavailable(_) => None,
        }
    }

    pub fn legend(&self, descriptions: &LabelDescriptions) -> Vec<LegendEntry> {
        self.labels()
            .map(|names| labels::legend(names, descriptions))
            .unwrap_or_default()
    }

    /// Run the model on `frame` and keep boxes with `confidence >= threshold`.
    pub fn detect(
        &mut self,
        frame: &Frame,
        source_kind: SourceKind,
        threshold: f32,
    ) -> Result<FrameResult, DetectError> {
        let threshold = validate_threshold(threshold)?;
        let backend = match &mut self.state {
            ModelState::Ready(backend) => backend,
            ModelState::Unavailable(msg) => return Err(DetectError::ModelUnavailable(msg.clone())),
        };

        let raw = backend
            .predict(frame, threshold)
            .map_err(|e| DetectError::Inference(format!("{:#}", e)))?;

        let (width, height) = frame.dimensions();
        let names = backend.class_names();
        let total = raw.len();
        let detections: Vec<DetectionRecord> = raw
            .into_iter()
            .filter(|b| accepts(b, threshold))
            .map(|b| {
                DetectionRecord::new(
                    source_kind,
                    b.class_id,
                    names.get(b.class_id),
                    b.confidence,
                    b.bbox.clamp_to(width, height),
                )
            })
            .collect();
        if detections.len() < total {
            log::debug!(
                "dropped {} of {} boxes below threshold {:.2}",
                total - detections.len(),
                total,
                threshold
            );
        }

        let annotated = annotate::render(frame, &detections);
        Ok(FrameResult::new(source_kind, frame.clone(), annotated, detections))
    }
}

fn accepts(b: &RawBox, threshold: f32) -> bool {
    b.confidence.is_finite() && b.confidence >= threshold && b.confidence <= 1.0
}

fn load_backend(
    path: &Path,
    kind: BackendKind,
    options: &DetectorOptions,
) -> Result<Box<dyn ModelBackend>> {
    if !path.exists() {
        return Err(anyhow!("model file {} not found", path.display()));
    }
    match kind {
        BackendKind::Scripted => {
            let mut backend = ScriptedBackend::from_file(path)?;
            if let Some(names) = &options.class_names {
                backend = backend.with_labels(names.clone());
            }
            Ok(Box::new(backend))
        }
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => {
            let mut backend = crate::detect::backends::TractBackend::new(
                path,
                options.input_size,
                options.iou_threshold,
            )?;
            if let Some(names) = &options.class_names {
                backend = backend.with_labels(names.clone());
            }
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => Err(anyhow!(
            "tract backend not enabled (build with --features backend-tract)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;

    fn frame() -> Frame {
        Frame::from_rgb(100, 100, vec![0u8; 100 * 100 * 3]).unwrap()
    }

    fn scripted() -> ScriptedBackend {
        ScriptedBackend::new(
            LabelMap::new(["Phytophthora", "Scab"]),
            vec![
                RawBox::new(1, 0.81, BoundingBox::new(10.0, 10.0, 50.0, 50.0)),
                RawBox::new(0, 0.30, BoundingBox::new(60.0, 60.0, 90.0, 90.0)),
                RawBox::new(4, 0.55, BoundingBox::new(20.0, 70.0, 140.0, 95.0)),
            ],
        )
    }

    #[test]
    fn keeps_native_order_and_maps_unknown_labels() {
        let mut detector = Detector::from_backend(Box::new(scripted()));
        let result = detector.detect(&frame(), SourceKind::Image, 0.25).unwrap();
        assert_eq!(result.labels(), vec!["Scab", "Phytophthora", "Unknown"]);
        assert_eq!(result.detections()[2].bbox().x2, 99.0);
        assert_eq!(result.source_kind(), SourceKind::Image);
    }

    #[test]
    fn threshold_is_enforced_even_when_backend_ignores_it() {
        let mut detector = Detector::from_backend(Box::new(scripted().ignoring_threshold()));
        let result = detector.detect(&frame(), SourceKind::Video, 0.5).unwrap();
        assert!(result.detections().iter().all(|d| d.confidence() >= 0.5));
        assert_eq!(result.detections().len(), 2);
    }

    #[test]
    fn invalid_threshold_never_reaches_backend() {
        let backend = scripted();
        let calls = backend.call_counter();
        let mut detector = Detector::from_backend(Box::new(backend));
        for bad in [-0.1, 1.5, f32::NAN] {
            let err = detector.detect(&frame(), SourceKind::Image, bad).unwrap_err();
            assert!(matches!(err, DetectError::InvalidArgument(_)));
        }
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn missing_model_degrades_permanently() {
        let path = Path::new("/nonexistent/weights/best.json");
        let err = Detector::load(path, BackendKind::Scripted, &DetectorOptions::default()).err();
        assert!(matches!(err, Some(DetectError::ModelUnavailable(_))));

        let mut detector = Detector::open(path, BackendKind::Scripted, &DetectorOptions::default());
        assert!(!detector.is_available());
        assert!(detector.load_error().is_some());
        for _ in 0..3 {
            let err = detector.detect(&frame(), SourceKind::Image, 0.25).unwrap_err();
            assert!(matches!(err, DetectError::ModelUnavailable(_)));
        }
    }

    #[test]
    fn class_name_override_applies_to_scripted_models() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(
            &mut file,
            br#"{"labels": ["a"], "boxes": [{"class_id": 0, "confidence": 0.9, "x1": 1, "y1": 1, "x2": 5, "y2": 5}]}"#,
        )?;
        let options = DetectorOptions {
            class_names: Some(LabelMap::new(["Healthy"])),
            ..DetectorOptions::default()
        };
        let mut detector = Detector::load(file.path(), BackendKind::Scripted, &options)?;
        let result = detector.detect(&frame(), SourceKind::Image, 0.25)?;
        assert_eq!(result.labels(), vec!["Healthy"]);
        Ok(())
    }
}
