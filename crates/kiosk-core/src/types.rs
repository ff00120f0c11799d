use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Fixed-length face feature vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance. Callers must compare vectors of equal dimension.
    pub fn distance(&self, other: &FeatureVector) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Face bounding region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingRegion {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another region.
    pub fn iou(&self, other: &BoundingRegion) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// One face found in one frame. Discarded after matching.
#[derive(Debug, Clone)]
pub struct Detection {
    pub feature_vector: FeatureVector,
    pub bounding_region: BoundingRegion,
    pub frame_timestamp: Instant,
}

/// Outcome of comparing a probe vector against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched {
        customer_id: String,
        distance_score: f32,
    },
    Unmatched,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }
}

/// Closed set of emotion labels produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Neutral,
    Angry,
    Surprise,
    Fear,
    Disgust,
    Contempt,
    #[default]
    Unknown,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Neutral => "neutral",
            Emotion::Angry => "angry",
            Emotion::Surprise => "surprise",
            Emotion::Fear => "fear",
            Emotion::Disgust => "disgust",
            Emotion::Contempt => "contempt",
            Emotion::Unknown => "unknown",
        }
    }

    /// Lenient parse; unrecognized labels map to `Unknown`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "happy" | "happiness" => Emotion::Happy,
            "sad" | "sadness" => Emotion::Sad,
            "neutral" => Emotion::Neutral,
            "angry" | "anger" => Emotion::Angry,
            "surprise" | "surprised" => Emotion::Surprise,
            "fear" => Emotion::Fear,
            "disgust" => Emotion::Disgust,
            "contempt" => Emotion::Contempt,
            _ => Emotion::Unknown,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer enrolled by the registration tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownCustomer {
    pub customer_id: String,
    pub display_name: String,
    pub vectors: Vec<FeatureVector>,
    pub phone_number: Option<String>,
}

/// A past purchase, used to personalize the follow-up message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub item: String,
    pub price: f64,
    /// ISO date of purchase (e.g. "2025-03-14").
    #[serde(default)]
    pub time: Option<String>,
}

/// Per-customer visit state used to gate notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub customer_id: String,
    pub last_visit_timestamp: Option<DateTime<Utc>>,
    pub last_emotion: Option<Emotion>,
    pub notification_in_progress: bool,
}

impl VisitRecord {
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            last_visit_timestamp: None,
            last_emotion: None,
            notification_in_progress: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical_is_zero() {
        let a = FeatureVector::new(vec![0.3, -0.2, 0.9]);
        assert_eq!(a.distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_distance_3_4_5() {
        let a = FeatureVector::new(vec![0.0, 0.0]);
        let b = FeatureVector::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_is_finite_rejects_nan() {
        assert!(FeatureVector::new(vec![1.0, 2.0]).is_finite());
        assert!(!FeatureVector::new(vec![1.0, f32::NAN]).is_finite());
    }

    #[test]
    fn test_iou_overlap() {
        let a = BoundingRegion { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 0.9 };
        let b = BoundingRegion { x: 5.0, y: 0.0, width: 10.0, height: 10.0, confidence: 0.8 };
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
        let far = BoundingRegion { x: 100.0, ..b };
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_emotion_parse_synonyms() {
        assert_eq!(Emotion::parse("Happiness"), Emotion::Happy);
        assert_eq!(Emotion::parse(" SAD "), Emotion::Sad);
        assert_eq!(Emotion::parse("anger"), Emotion::Angry);
        assert_eq!(Emotion::parse("bored"), Emotion::Unknown);
    }

    #[test]
    fn test_emotion_serde_lowercase() {
        let json = serde_json::to_string(&Emotion::Neutral).unwrap();
        assert_eq!(json, "\"neutral\"");
        let back: Emotion = serde_json::from_str("\"angry\"").unwrap();
        assert_eq!(back, Emotion::Angry);
    }

    #[test]
    fn test_match_result_is_match() {
        let m = MatchResult::Matched { customer_id: "c1".into(), distance_score: 0.1 };
        assert!(m.is_match());
        assert!(!MatchResult::Unmatched.is_match());
    }
}
