//! SCRFD face localization via ONNX Runtime.
//!
//! Letterboxes the grayscale frame into the 640x640 model input, decodes the
//! three stride levels (score + distance-to-edge boxes) and suppresses
//! overlapping boxes with NMS.

use crate::capability::FaceLocator;
use crate::pipeline::FrameView;
use crate::types::BoundingRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let side = SCRFD_INPUT_SIZE as f32;
        let scale = (side / width as f32).min(side / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((SCRFD_INPUT_SIZE as f32 - new_w) / 2.0).floor(),
            pad_y: ((SCRFD_INPUT_SIZE as f32 - new_h) / 2.0).floor(),
        }
    }

    fn to_frame(self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Open an ONNX session with the intra-op thread count shared by all kiosk models.
pub(crate) fn load_session(model_path: &str) -> Result<Session, ort::Error> {
    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;
    Ok(session)
}

/// SCRFD detector session.
pub struct FaceDetector {
    session: Session,
    score_threshold: f32,
    nms_threshold: f32,
}

impl FaceDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = load_session(model_path)?;

        let outputs = session.outputs().len();
        if outputs < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {outputs} outputs"
            )));
        }

        tracing::info!(path = model_path, outputs, "loaded SCRFD model");

        Ok(Self {
            session,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, frame: &FrameView<'_>) -> Result<Vec<BoundingRegion>, DetectorError> {
        let (input, letterbox) = preprocess(frame)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            // Standard export order: scores for strides 8/16/32, then boxes.
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("scores at stride {stride}: {e}"))
                })?;
            let (_, boxes) = outputs[level + SCRFD_STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("boxes at stride {stride}: {e}"))
                })?;

            candidates.extend(decode_level(scores, boxes, stride, letterbox, self.score_threshold));
        }

        Ok(non_max_suppression(candidates, self.nms_threshold))
    }
}

impl FaceLocator for FaceDetector {
    fn locate(&mut self, frame: &FrameView<'_>) -> Result<Vec<BoundingRegion>, DetectorError> {
        self.detect(frame)
    }
}

/// Letterbox the frame into a normalized NCHW tensor. Padding uses the mean
/// so it normalizes to zero.
fn preprocess(frame: &FrameView<'_>) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let pixels = (frame.width as usize) * (frame.height as usize);
    if pixels == 0 || frame.data.len() < pixels {
        return Err(DetectorError::InferenceFailed(format!(
            "frame buffer holds {} bytes for {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        )));
    }
    let source = GrayImage::from_raw(frame.width, frame.height, frame.data[..pixels].to_vec())
        .ok_or_else(|| DetectorError::InferenceFailed("invalid frame buffer".into()))?;

    let letterbox = Letterbox::fit(frame.width, frame.height);
    let new_w = ((frame.width as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((frame.height as f32 * letterbox.scale).round() as u32).max(1);
    let resized = imageops::resize(&source, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (pad_x, pad_y) = (letterbox.pad_x as u32, letterbox.pad_y as u32);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
        if tx >= size || ty >= size {
            continue;
        }
        let normalized = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = normalized;
        }
    }

    Ok((tensor, letterbox))
}

/// Decode one stride level into frame-space regions above `threshold`.
fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: Letterbox,
    threshold: f32,
) -> Vec<BoundingRegion> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > threshold && i * 4 + 3 < boxes.len())
        .map(|i| {
            let cell = i / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;
            let d = &boxes[i * 4..i * 4 + 4];

            let (x1, y1) = letterbox.to_frame(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.to_frame(ax + d[2] * step, ay + d[3] * step);

            BoundingRegion {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[i],
            }
        })
        .collect()
}

/// Greedy NMS; output is sorted by descending confidence.
fn non_max_suppression(
    mut regions: Vec<BoundingRegion>,
    iou_threshold: f32,
) -> Vec<BoundingRegion> {
    regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingRegion> = Vec::with_capacity(regions.len());
    for region in regions {
        if kept.iter().all(|k| k.iou(&region) <= iou_threshold) {
            kept.push(region);
        }
    }
    kept
}
