#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::{non_max_suppression, ModelBackend, RawBox};
use crate::frame::{BoundingBox, Frame};
use crate::labels::LabelMap;

/// YOLO-family ONNX export run through tract.
///
/// Expects a square `[1, 3, S, S]` float input and a `[1, 4 + classes, N]`
/// output of `(cx, cy, w, h, class scores...)` columns. Frames are resized to
/// the model input, and boxes are scaled back to frame pixels.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    iou_threshold: f32,
    labels: LabelMap,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, iou_threshold: f32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let mut backend = Self {
            model,
            input_size,
            iou_threshold,
            labels: LabelMap::default(),
        };
        let classes = backend.probe_class_count()?;
        backend.labels = LabelMap::numbered(classes);
        Ok(backend)
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = labels;
        self
    }

    /// Run a blank input once to learn the class count from the output shape.
    fn probe_class_count(&mut self) -> Result<usize> {
        let side = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side)).into_tensor();
        let outputs = self.model.run(tvec!(blank.into())).context("probe inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let shape = output.shape();
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        Ok(shape[1] - 4)
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame, confidence: f32) -> Result<Vec<RawBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;

        let (_, rows, candidates) = view.dim();
        if rows <= 4 {
            return Err(anyhow!("model output has no class scores"));
        }
        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;

        let mut boxes = Vec::new();
        for i in 0..candidates {
            let (class_id, score) = (4..rows)
                .map(|row| (row - 4, view[[0, row, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score.is_nan() || score < confidence {
                continue;
            }
            let cx = view[[0, 0, i]] * scale_x;
            let cy = view[[0, 1, i]] * scale_y;
            let w = view[[0, 2, i]] * scale_x;
            let h = view[[0, 3, i]] * scale_y;
            boxes.push(RawBox::new(
                class_id,
                score,
                BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
            ));
        }
        non_max_suppression(&mut boxes, self.iou_threshold);
        Ok(boxes)
    }
}

impl ModelBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_names(&self) -> &LabelMap {
        &self.labels
    }

    fn predict(&mut self, frame: &Frame, confidence: f32) -> Result<Vec<RawBox>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, confidence)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side)).into_tensor();
        self.model
            .run(tvec!(blank.into()))
            .map(|_| ())
            .context("warm-up inference failed")
    }
}
