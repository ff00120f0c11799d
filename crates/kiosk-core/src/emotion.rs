//! FER+ emotion classifier via ONNX Runtime.
//!
//! Input is a 64x64 grayscale crop with raw 0–255 pixel values; output is
//! 8 class scores in FER+ order.

use crate::capability::EmotionClassifier;
use crate::crop::FaceImage;
use crate::detector::load_session;
use crate::types::Emotion;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

const FERPLUS_INPUT_SIZE: usize = 64;
const FERPLUS_LABELS: [Emotion; 8] = [
    Emotion::Neutral,
    Emotion::Happy,
    Emotion::Surprise,
    Emotion::Sad,
    Emotion::Angry,
    Emotion::Disgust,
    Emotion::Fear,
    Emotion::Contempt,
];
/// Below this winning probability the label is reported as unknown.
const MIN_CONFIDENCE: f32 = 0.3;

/// Used when no emotion model is installed.
pub struct UnknownEmotion;

impl EmotionClassifier for UnknownEmotion {
    fn classify(&mut self, _face: &FaceImage) -> Emotion {
        Emotion::Unknown
    }
}

pub struct FerPlusClassifier {
    session: Session,
}

impl FerPlusClassifier {
    pub fn load(model_path: &str) -> Result<Self, ort::Error> {
        let session = load_session(model_path)?;
        tracing::info!(path = model_path, "loaded FER+ emotion model");
        Ok(Self { session })
    }

    fn run(&mut self, face: &FaceImage) -> Result<Vec<f32>, String> {
        let size = FERPLUS_INPUT_SIZE;
        let pixels = face.resized(size as u32);
        let mut input = Array4::<f32>::zeros((1, 1, size, size));
        for (i, &p) in pixels.iter().enumerate().take(size * size) {
            input[[0, 0, i / size, i % size]] = p as f32;
        }

        let view = TensorRef::from_array_view(input.view()).map_err(|e| e.to_string())?;
        let outputs = self.session.run(ort::inputs![view]).map_err(|e| e.to_string())?;
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| e.to_string())?;
        Ok(scores.to_vec())
    }
}

impl EmotionClassifier for FerPlusClassifier {
    fn classify(&mut self, face: &FaceImage) -> Emotion {
        match self.run(face) {
            Ok(scores) => label_from_scores(&scores),
            Err(e) => {
                tracing::warn!(error = %e, "emotion classification failed");
                Emotion::Unknown
            }
        }
    }
}

/// Softmax the raw scores and pick the dominant label.
fn label_from_scores(scores: &[f32]) -> Emotion {
    if scores.len() != FERPLUS_LABELS.len() || scores.iter().any(|s| !s.is_finite()) {
        return Emotion::Unknown;
    }

    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();

    let (best, prob) = exps
        .iter()
        .enumerate()
        .map(|(i, e)| (i, e / total))
        .fold((0, f32::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });

    if prob < MIN_CONFIDENCE {
        Emotion::Unknown
    } else {
        FERPLUS_LABELS[best]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dominant_label() {
        let scores = [0.1, 6.0, 0.2, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(label_from_scores(&scores), Emotion::Happy);
    }

    #[test]
    fn test_flat_scores_are_unknown() {
        assert_eq!(label_from_scores(&[1.0; 8]), Emotion::Unknown);
    }

    #[test]
    fn test_malformed_scores_are_unknown() {
        assert_eq!(label_from_scores(&[1.0, 2.0]), Emotion::Unknown);
        let mut scores = [0.0f32; 8];
        scores[3] = f32::NAN;
        assert_eq!(label_from_scores(&scores), Emotion::Unknown);
    }
}
