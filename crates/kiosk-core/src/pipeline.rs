//! Capture & detection adapter: frame in, detections out.

use crate::capability::{EncodeError, FaceLocator, FeatureEncoder};
use crate::crop::FaceImage;
use crate::types::Detection;
use std::time::Instant;

/// Borrowed grayscale frame (width * height bytes, row-major).
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

/// A detection plus the crop it was encoded from, kept so the emotion
/// classifier can run on the same pixels after a match.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub detection: Detection,
    pub face: FaceImage,
}

/// Runs localization and encoding over a single frame. Holds no per-frame
/// state; every call is independent.
pub struct DetectionAdapter<L, E> {
    locator: L,
    encoder: E,
}

impl<L: FaceLocator, E: FeatureEncoder> DetectionAdapter<L, E> {
    pub fn new(locator: L, encoder: E) -> Self {
        Self { locator, encoder }
    }

    pub fn dimension(&self) -> usize {
        self.encoder.dimension()
    }

    /// Locate and encode every face in the frame.
    ///
    /// Localization failure yields no detections; a region the encoder
    /// rejects is skipped. Neither is an error to the caller.
    pub fn detect(&mut self, frame: &FrameView<'_>) -> Vec<FaceObservation> {
        let regions = match self.locator.locate(frame) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(error = %e, "face localization failed");
                return Vec::new();
            }
        };

        let mut observations = Vec::with_capacity(regions.len());
        for region in regions {
            let Some(face) = FaceImage::from_frame(frame, &region) else {
                tracing::debug!(?region, "region outside frame; skipping");
                continue;
            };

            match self.encoder.encode(&face) {
                Ok(feature_vector) => observations.push(FaceObservation {
                    detection: Detection {
                        feature_vector,
                        bounding_region: region,
                        frame_timestamp: frame.timestamp,
                    },
                    face,
                }),
                Err(EncodeError::NoFaceDetected) => {
                    tracing::debug!(?region, "encoder found no usable face");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "face encoding failed");
                }
            }
        }

        observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::types::{BoundingRegion, FeatureVector};

    struct FixedLocator(Result<Vec<BoundingRegion>, ()>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _frame: &FrameView<'_>) -> Result<Vec<BoundingRegion>, DetectorError> {
            self.0
                .clone()
                .map_err(|_| DetectorError::InferenceFailed("boom".into()))
        }
    }

    /// Rejects crops narrower than 10px, otherwise encodes the crop width.
    struct WidthEncoder;

    impl FeatureEncoder for WidthEncoder {
        fn dimension(&self) -> usize {
            1
        }

        fn encode(&mut self, face: &FaceImage) -> Result<FeatureVector, EncodeError> {
            if face.width() < 10 {
                return Err(EncodeError::NoFaceDetected);
            }
            Ok(FeatureVector::new(vec![face.width() as f32]))
        }
    }

    fn region(x: f32, size: f32) -> BoundingRegion {
        BoundingRegion { x, y: 0.0, width: size, height: size, confidence: 0.9 }
    }

    #[test]
    fn test_detect_skips_rejected_regions() {
        let data = vec![100u8; 200 * 100];
        let frame = FrameView { data: &data, width: 200, height: 100, timestamp: Instant::now() };
        let locator = FixedLocator(Ok(vec![region(10.0, 40.0), region(150.0, 4.0)]));
        let mut adapter = DetectionAdapter::new(locator, WidthEncoder);

        let obs = adapter.detect(&frame);
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].detection.bounding_region.x, 10.0);
        assert_eq!(obs[0].detection.frame_timestamp, frame.timestamp);
    }

    #[test]
    fn test_locator_failure_yields_nothing() {
        let data = vec![100u8; 50 * 50];
        let frame = FrameView { data: &data, width: 50, height: 50, timestamp: Instant::now() };
        let mut adapter = DetectionAdapter::new(FixedLocator(Err(())), WidthEncoder);
        assert!(adapter.detect(&frame).is_empty());
    }
}
