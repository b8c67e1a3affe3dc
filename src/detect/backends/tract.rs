#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use serde::Deserialize;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::resources::DetectorResources;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::Frame;

/// Model description read from the detector config file.
#[derive(Clone, Debug, Deserialize)]
pub struct TractModelConfig {
    pub input_width: u32,
    pub input_height: u32,
    /// Box coordinates are fractions of the input rather than input pixels.
    #[serde(default = "default_normalized")]
    pub normalized_boxes: bool,
    /// Index of the first class score in each output row.
    #[serde(default = "default_class_offset")]
    pub class_offset: usize,
}

fn default_normalized() -> bool {
    true
}

fn default_class_offset() -> usize {
    5
}

/// Tract-based backend for YOLO-style ONNX models.
///
/// Each output row is `[cx, cy, w, h, objectness, class scores...]`. The class
/// is the arg-max score and the confidence is that score.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    config: TractModelConfig,
}

impl TractDetector {
    pub fn from_resources(resources: &DetectorResources) -> Result<Self> {
        let config = read_model_config(&resources.config_path)?;
        Self::new(&resources.weights_path, config)
    }

    pub fn new<P: AsRef<Path>>(model_path: P, config: TractModelConfig) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(
                        1,
                        3,
                        config.input_height as usize,
                        config.input_width as usize
                    ),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, config })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = image::imageops::resize(
            &image,
            self.config.input_width,
            self.config.input_height,
            FilterType::Triangle,
        );
        let input = tract_ndarray::Array4::from_shape_fn(
            (
                1,
                3,
                self.config.input_height as usize,
                self.config.input_width as usize,
            ),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode_rows(&self, rows: &[f32], row_len: usize, frame: &Frame, out: &mut Vec<RawDetection>) {
        let (scale_x, scale_y) = if self.config.normalized_boxes {
            (frame.width as f32, frame.height as f32)
        } else {
            (
                frame.width as f32 / self.config.input_width as f32,
                frame.height as f32 / self.config.input_height as f32,
            )
        };
        for row in rows.chunks_exact(row_len) {
            let scores = &row[self.config.class_offset..];
            let Some((class_id, &confidence)) = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
            else {
                continue;
            };
            if confidence.is_nan() || confidence <= 0.0 {
                continue;
            }
            let center_x = (row[0] * scale_x) as i32;
            let center_y = (row[1] * scale_y) as i32;
            let w = (row[2] * scale_x).max(0.0) as u32;
            let h = (row[3] * scale_y).max(0.0) as u32;
            let bbox = BoundingBox::new(
                center_x - (w / 2) as i32,
                center_y - (h / 2) as i32,
                w,
                h,
            );
            out.push(RawDetection::new(class_id, confidence.min(1.0), bbox));
        }
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let mut detections = Vec::new();
        for output in outputs.iter() {
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            let row_len = *view
                .shape()
                .last()
                .ok_or_else(|| anyhow!("model output has no dimensions"))?;
            if row_len <= self.config.class_offset {
                return Err(anyhow!(
                    "model output rows of {} values leave no class scores",
                    row_len
                ));
            }
            let contiguous = view.as_standard_layout();
            let rows = contiguous
                .as_slice()
                .ok_or_else(|| anyhow!("model output is not contiguous"))?;
            self.decode_rows(rows, row_len, frame, &mut detections);
        }
        Ok(detections)
    }
}

fn read_model_config(path: &Path) -> Result<TractModelConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read detector config {}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid detector config {}: {}", path.display(), e))
}
