//! ONNX Runtime session wrappers.
//!
//! Two session profiles back the same model: the primary profile runs with
//! full graph optimization and the configured intra-op thread count; the
//! fallback profile is deliberately conservative (basic optimization, single
//! thread) so it can still load models or inputs the optimized path rejects.

use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::config::{OnnxBackend, OnnxSection};
use crate::DetectError;

/// A raw detection row in letterbox coordinates: `[cx, cy, w, h, conf]`.
pub type DetectionRow = [f32; 5];

/// A loaded model plus the profile it was built with.
pub struct NeuralModel {
    session: Mutex<Session>,
    backend: OnnxBackend,
    input_size: u32,
}

impl NeuralModel {
    /// Load the model with the profile selected by `backend`.
    pub fn load(cfg: &OnnxSection, backend: OnnxBackend) -> Result<Self, DetectError> {
        let builder = Session::builder().map_err(model_err)?;
        let mut builder = match backend {
            OnnxBackend::Primary => builder
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(model_err)?
                .with_intra_threads(cfg.runtime.threads.max(1))
                .map_err(model_err)?
                .with_memory_pattern(true)
                .map_err(model_err)?,
            OnnxBackend::Fallback => builder
                .with_optimization_level(GraphOptimizationLevel::Level1)
                .map_err(model_err)?
                .with_intra_threads(1)
                .map_err(model_err)?,
        };
        let session = builder
            .commit_from_file(&cfg.model_path)
            .map_err(|e| DetectError::Model(format!("{}: {e}", cfg.model_path.display())))?;
        tracing::info!(
            "loaded detection model {} ({:?} profile)",
            cfg.model_path.display(),
            backend
        );
        Ok(Self {
            session: Mutex::new(session),
            backend,
            input_size: cfg.input_size,
        })
    }

    pub fn backend(&self) -> OnnxBackend {
        self.backend
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Run inference over an already letterboxed canvas and return raw
    /// detection rows in letterbox coordinates.
    ///
    /// The model output is accepted in either `[1, 5, N]` or `[1, N, 5]`
    /// layout; the transposed form is normalised here.
    pub fn infer_letterboxed(&self, canvas: &RgbImage) -> Result<Vec<DetectionRow>, DetectError> {
        let (w, h) = canvas.dimensions();
        let mut input = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
        for (x, y, p) in canvas.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = p[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = p[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = p[2] as f32 / 255.0;
        }

        let tensor = Tensor::from_array(input).map_err(model_err)?;
        let mut session = self.session.lock().unwrap();
        let outputs = session
            .run(ort::inputs!["images" => tensor])
            .map_err(model_err)?;
        if outputs.len() == 0 {
            return Err(DetectError::Model("model produced no outputs".into()));
        }
        let output = &outputs[0];
        let (shape, data) = output.try_extract_tensor::<f32>().map_err(model_err)?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let rows = parse_detection_rows(&dims, data)?;
        Ok(rows)
    }
}

fn model_err<E: std::fmt::Display>(e: E) -> DetectError {
    DetectError::Model(e.to_string())
}

/// Normalise a `[1, 5, N]` or `[1, N, 5]` output block into rows.
fn parse_detection_rows(dims: &[usize], data: &[f32]) -> Result<Vec<DetectionRow>, DetectError> {
    let (attrs, count, transposed) = match dims {
        [1, a, n] if *a == 5 => (*a, *n, true),
        [1, n, a] if *a == 5 => (*a, *n, false),
        [n, a] if *a == 5 => (*a, *n, false),
        _ => {
            return Err(DetectError::Model(format!(
                "unexpected model output shape {dims:?}"
            )))
        }
    };
    if data.len() < attrs * count {
        return Err(DetectError::Model("model output truncated".into()));
    }

    let mut rows = Vec::with_capacity(count);
    for i in 0..count {
        let mut row = [0.0f32; 5];
        for (a, value) in row.iter_mut().enumerate() {
            *value = if transposed {
                data[a * count + i]
            } else {
                data[i * attrs + a]
            };
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_row_major_output() {
        let data = [10.0, 20.0, 4.0, 6.0, 0.9, 50.0, 60.0, 8.0, 8.0, 0.7];
        let rows = parse_detection_rows(&[1, 2, 5], &data).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], [10.0, 20.0, 4.0, 6.0, 0.9]);
        assert_eq!(rows[1], [50.0, 60.0, 8.0, 8.0, 0.7]);
    }

    #[test]
    fn parses_transposed_output() {
        // Same two detections, laid out attribute-major.
        let data = [
            10.0, 50.0, // cx
            20.0, 60.0, // cy
            4.0, 8.0, // w
            6.0, 8.0, // h
            0.9, 0.7, // conf
        ];
        let rows = parse_detection_rows(&[1, 5, 2], &data).unwrap();
        assert_eq!(rows[0], [10.0, 20.0, 4.0, 6.0, 0.9]);
        assert_eq!(rows[1], [50.0, 60.0, 8.0, 8.0, 0.7]);
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert!(parse_detection_rows(&[1, 4, 4], &[0.0; 16]).is_err());
    }
}
