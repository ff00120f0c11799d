//! ArcFace feature encoder via ONNX Runtime.
//!
//! Encodes a square face crop, resized to 112x112, into an L2-normalized
//! 512-dimensional vector (w600k_r50 model).

use crate::capability::{EncodeError, FeatureEncoder};
use crate::crop::FaceImage;
use crate::detector::load_session;
use crate::types::FeatureVector;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
pub const ARCFACE_DIMENSION: usize = 512;
/// Crops smaller than this on either side carry too little detail to encode.
const MIN_CROP_SIDE: u32 = 24;

pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    pub fn load(model_path: &str) -> Result<Self, EncodeError> {
        if !Path::new(model_path).exists() {
            return Err(EncodeError::InferenceFailed(format!("model file not found: {model_path}")));
        }

        let session = load_session(model_path)
            .map_err(|e| EncodeError::InferenceFailed(format!("loading {model_path}: {e}")))?;

        tracing::info!(path = model_path, "loaded ArcFace model");
        Ok(Self { session })
    }

    fn preprocess(face: &[u8]) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (i, &pixel) in face.iter().take(size * size).enumerate() {
            let v = (pixel as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            let (y, x) = (i / size, i % size);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] = v;
            }
        }
        tensor
    }
}

impl FeatureEncoder for ArcFaceEncoder {
    fn dimension(&self) -> usize {
        ARCFACE_DIMENSION
    }

    fn encode(&mut self, face: &FaceImage) -> Result<FeatureVector, EncodeError> {
        if face.width() < MIN_CROP_SIDE || face.height() < MIN_CROP_SIDE {
            return Err(EncodeError::NoFaceDetected);
        }

        let input = Self::preprocess(&face.resized(ARCFACE_INPUT_SIZE as u32));
        let view = TensorRef::from_array_view(input.view())
            .map_err(|e| EncodeError::InferenceFailed(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![view])
            .map_err(|e| EncodeError::InferenceFailed(e.to_string()))?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncodeError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_DIMENSION {
            return Err(EncodeError::InferenceFailed(format!(
                "expected {ARCFACE_DIMENSION}-dim embedding, got {}",
                raw.len()
            )));
        }

        l2_normalize(raw.to_vec())
            .map(FeatureVector::new)
            .ok_or(EncodeError::NoFaceDetected)
    }
}

/// Scale to unit length; a zero or non-finite vector carries no identity.
fn l2_normalize(values: Vec<f32>) -> Option<Vec<f32>> {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        Some(values.into_iter().map(|x| x / norm).collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_channels() {
        let face = vec![100u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE];
        let tensor = ArcFaceEncoder::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);
        let expected = (100.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 5, 7]] - expected).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 5, 7]], tensor[[0, 2, 5, 7]]);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert!(l2_normalize(vec![0.0, 0.0]).is_none());
    }
}
