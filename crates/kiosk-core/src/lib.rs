//! kiosk-core — Customer recognition building blocks for the smart kiosk.
//!
//! Holds the data model, the nearest-neighbor matcher over the known-customer
//! registry, the collaborator traits consumed by the daemon, and the ONNX
//! models (SCRFD detection, ArcFace encoding, FER+ emotion) behind them.

pub mod capability;
pub mod crop;
pub mod detector;
pub mod emotion;
pub mod encoder;
pub mod matcher;
pub mod pipeline;
pub mod prompt;
pub mod registry;
pub mod types;

pub use capability::{
    DeliveryError, DeliveryReceipt, EmotionClassifier, EncodeError, FaceLocator, FeatureEncoder,
    MessagingChannel, ServiceError, SpeechError, SpeechSynthesizer, TextGenerator,
};
pub use crop::FaceImage;
pub use detector::{DetectorError, FaceDetector};
pub use emotion::{FerPlusClassifier, UnknownEmotion};
pub use encoder::{ArcFaceEncoder, ARCFACE_DIMENSION};
pub use matcher::{EuclideanMatcher, Matcher};
pub use pipeline::{DetectionAdapter, FaceObservation, FrameView};
pub use registry::Registry;
pub use types::{
    BoundingRegion, Detection, Emotion, FeatureVector, KnownCustomer, MatchResult, PurchaseItem,
    VisitRecord,
};

/// Default directory for ONNX model files.
///
/// Resolves to `$XDG_DATA_HOME/smart-kiosk/models`, falling back to
/// `$HOME/.local/share/smart-kiosk/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("smart-kiosk/models")
}
