//! Collaborator interfaces consumed by the kiosk daemon.
//!
//! Vision capabilities are synchronous and owned by the sensing thread.
//! Text generation, speech and messaging are async and shared across
//! notification tasks, so they are object-safe via `async_trait`.

use crate::crop::FaceImage;
use crate::detector::DetectorError;
use crate::pipeline::FrameView;
use crate::types::{BoundingRegion, Emotion, FeatureVector};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("no face detected in region")]
    NoFaceDetected,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("service returned no text")]
    EmptyResponse,
}

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("failed to start synthesizer: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("synthesizer exited with {0}")]
    Exit(String),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("messaging not configured")]
    NotConfigured,
    #[error("send failed: {0}")]
    Request(String),
    #[error("channel rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Proof of a message accepted by the messaging channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub id: String,
}

/// Finds face regions in a grayscale frame.
pub trait FaceLocator: Send {
    fn locate(&mut self, frame: &FrameView<'_>) -> Result<Vec<BoundingRegion>, DetectorError>;
}

/// Turns a face crop into a fixed-length feature vector.
pub trait FeatureEncoder: Send {
    /// Length of every vector this encoder produces.
    fn dimension(&self) -> usize;
    fn encode(&mut self, face: &FaceImage) -> Result<FeatureVector, EncodeError>;
}

/// Labels the dominant emotion of a face crop. Never fails: internal
/// errors yield [`Emotion::Unknown`].
pub trait EmotionClassifier: Send {
    fn classify(&mut self, face: &FaceImage) -> Emotion;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;
}

#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn send(&self, recipient: &str, body: &str) -> Result<DeliveryReceipt, DeliveryError>;
}
