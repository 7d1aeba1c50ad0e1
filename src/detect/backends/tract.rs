#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo::YoloDecoder;
use crate::frame::Frame;

/// Tract-based backend for single-shot ONNX detectors (YOLOv5 layout).
///
/// The model is loaded once from a local file. Each frame is resized to the
/// square model input, scaled to [0, 1] and fed as NCHW RGB.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    decoder: YoloDecoder,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, decoder: YoloDecoder) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = decoder.input_size() as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract: loaded {} ({}x{} input)",
            model_path.display(),
            size,
            size
        );
        Ok(Self { model, decoder })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let size = self.decoder.input_size();
        let rgb = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = image::imageops::resize(&rgb, size, size, FilterType::Triangle);

        let side = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode_output(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!(
                "unexpected model output shape {:?} (expected [1, rows, 5 + classes])",
                shape
            ));
        }
        let row_len = shape[2];
        if row_len != self.decoder.row_len() {
            log::warn!(
                "tract: output rows have {} values, configured classes imply {}",
                row_len,
                self.decoder.row_len()
            );
        }
        let rows: Vec<f32> = view.iter().copied().collect();
        Ok(self
            .decoder
            .decode(&rows, row_len, frame.width, frame.height))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_output(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.decoder.input_size();
        let blank = Frame::filled(size, size, [0, 0, 0])?;
        self.detect(&blank).map(|_| ())
    }
}
