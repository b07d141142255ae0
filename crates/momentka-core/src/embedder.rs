//! Face descriptor extraction via ONNX Runtime.
//!
//! Produces 128-dimensional descriptors from aligned face crops using a
//! MobileFaceNet-style embedding model.

use crate::alignment;
use crate::types::{Descriptor, DESCRIPTOR_DIM};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: u32 = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5; // symmetric normalization, NOT the detector's 128.0

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — fetch the model files first")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — the detector must supply landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Descriptor model session over aligned 112×112 crops.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the descriptor ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded descriptor model"
        );

        Ok(Self { session })
    }

    /// Extract a descriptor for one detected face in an RGB photo.
    ///
    /// The face is aligned to the canonical 112×112 pose from its landmarks
    /// before the embedding runs; the output is L2-normalized.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        landmarks: &[(f32, f32); 5],
    ) -> Result<Descriptor, EmbedderError> {
        let aligned = alignment::align_face(image, landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != DESCRIPTOR_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor::new(l2_normalize(raw)))
    }
}

/// Preprocess an aligned 112×112 RGB crop into a NCHW float tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..EMBED_INPUT_SIZE {
        for x in 0..EMBED_INPUT_SIZE {
            let px = if x < aligned.width() && y < aligned.height() {
                aligned.get_pixel(x, y).0
            } else {
                [0, 0, 0]
            };
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - EMBED_MEAN) / EMBED_STD;
            }
        }
    }

    tensor
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = RgbImage::from_pixel(EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, Rgb([128, 128, 128]));
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let aligned = RgbImage::from_pixel(EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, Rgb([128, 128, 128]));
        let tensor = preprocess(&aligned);
        let expected = (128.0 - EMBED_MEAN) / EMBED_STD;
        let val = tensor[[0, 0, 0, 0]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn test_preprocess_channel_order() {
        let aligned = RgbImage::from_pixel(EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, Rgb([0, 128, 255]));
        let tensor = preprocess(&aligned);
        assert!((tensor[[0, 0, 5, 5]] - (0.0 - EMBED_MEAN) / EMBED_STD).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] - (128.0 - EMBED_MEAN) / EMBED_STD).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - (255.0 - EMBED_MEAN) / EMBED_STD).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_undersized_crop_pads_black() {
        // A crop smaller than 112x112 must not panic; missing pixels read black.
        let aligned = RgbImage::from_pixel(64, 64, Rgb([200, 200, 200]));
        let tensor = preprocess(&aligned);
        let padded = tensor[[0, 0, 100, 100]];
        assert!((padded - (0.0 - EMBED_MEAN) / EMBED_STD).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let raw = vec![3.0f32, 4.0];
        let normalized = l2_normalize(raw);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        let raw = vec![0.0f32; 4];
        assert_eq!(l2_normalize(raw), vec![0.0f32; 4]);
    }
}
