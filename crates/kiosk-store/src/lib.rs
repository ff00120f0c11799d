//! kiosk-store — Durable customer documents.
//!
//! One document per customer, keyed by customer id. The registration tool
//! writes documents; the kiosk daemon reads them at startup and updates the
//! visit fields on every recognized visit.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiosk_core::{Emotion, FeatureVector, KnownCustomer, PurchaseItem};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::SqliteStore;

/// Default database location.
///
/// Resolves to `$XDG_DATA_HOME/smart-kiosk/customers.db`, falling back to
/// `$HOME/.local/share/smart-kiosk/customers.db`.
pub fn default_db_path() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("smart-kiosk/customers.db")
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient: the backend is busy, locked or temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("customer not found: {0}")]
    NotFound(String),
    #[error("corrupt document {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A customer document as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Enrolled face vectors, one per registration photo.
    #[serde(default)]
    pub encodings: Vec<Vec<f32>>,
    #[serde(default)]
    pub purchase_history: Vec<PurchaseItem>,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_emotion: Option<Emotion>,
}

impl CustomerDocument {
    pub fn to_known_customer(&self) -> KnownCustomer {
        KnownCustomer {
            customer_id: self.id.clone(),
            display_name: self.name.clone(),
            vectors: self
                .encodings
                .iter()
                .map(|v| FeatureVector::new(v.clone()))
                .collect(),
            phone_number: self.phone_number.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

/// Visit fields written on every recognized visit.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitUpdate {
    pub last_visit: DateTime<Utc>,
    pub last_emotion: Emotion,
}

/// Fields that support exact-match queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryField {
    Name,
    PhoneNumber,
    LastEmotion,
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Point read by customer id.
    async fn get(&self, id: &str) -> Result<Option<CustomerDocument>, StoreError>;

    /// All documents whose `field` equals `value`, in insertion order.
    async fn find_by(&self, field: QueryField, value: &str)
        -> Result<Vec<CustomerDocument>, StoreError>;

    /// Every document, in insertion order.
    async fn list(&self) -> Result<Vec<CustomerDocument>, StoreError>;

    /// Partial update of the visit fields. `NotFound` if the id is unknown.
    async fn record_visit(&self, id: &str, update: &VisitUpdate) -> Result<(), StoreError>;

    /// Reset the visit fields to empty. `NotFound` if the id is unknown.
    async fn clear_visit(&self, id: &str) -> Result<(), StoreError>;

    /// Insert or replace registration fields. Existing visit fields are kept
    /// unless the incoming document sets them.
    async fn upsert(&self, doc: &CustomerDocument) -> Result<(), StoreError>;
}
