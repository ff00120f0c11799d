use crate::gateway::{GatewayError, PersistenceGateway};
use chrono::{DateTime, Utc};
use kiosk_core::{Emotion, PurchaseItem, VisitRecord};
use kiosk_store::VisitUpdate;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// Source of "now" for visit decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Last visit is inside the visit window.
    RecentVisit,
    /// A notification for this customer is still being scheduled.
    InFlight,
    /// The durable record could not be read or written.
    Unresolved,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::RecentVisit => "recent_visit",
            SuppressReason::InFlight => "in_flight",
            SuppressReason::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisitDecision {
    Notify { purchase_history: Vec<PurchaseItem> },
    Suppress(SuppressReason),
}

/// The durable `last_visit` timestamp decides the visit window. The
/// in-flight flag lives only in memory; after a restart the timestamp
/// still suppresses.
pub struct VisitStateStore {
    gateway: Arc<PersistenceGateway>,
    clock: Arc<dyn Clock>,
    window: chrono::Duration,
    shards: Vec<tokio::sync::Mutex<()>>,
    in_flight: Mutex<HashSet<String>>,
}

impl VisitStateStore {
    pub fn new(
        gateway: Arc<PersistenceGateway>,
        clock: Arc<dyn Clock>,
        window: chrono::Duration,
        lock_shards: usize,
    ) -> Self {
        Self {
            gateway,
            clock,
            window,
            shards: (0..lock_shards.max(1)).map(|_| tokio::sync::Mutex::new(())).collect(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn shard(&self, customer_id: &str) -> &tokio::sync::Mutex<()> {
        let mut hasher = DefaultHasher::new();
        customer_id.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether this accepted detection starts a new notified visit.
    ///
    /// The read, decision and write run under the customer's shard lock.
    /// The visit fields are written even when the visit is suppressed.
    pub async fn begin_visit(&self, customer_id: &str, emotion: Emotion) -> VisitDecision {
        let _guard = self.shard(customer_id).lock().await;

        let record = match self.gateway.read_record(customer_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(customer_id, error = %e, "visit record unreadable; suppressing");
                return VisitDecision::Suppress(SuppressReason::Unresolved);
            }
        };

        let now = self.clock.now();
        let decision = if self.in_flight().contains(customer_id) {
            VisitDecision::Suppress(SuppressReason::InFlight)
        } else if record
            .visit
            .last_visit_timestamp
            .is_some_and(|last| now - last < self.window)
        {
            VisitDecision::Suppress(SuppressReason::RecentVisit)
        } else {
            VisitDecision::Notify {
                purchase_history: record.purchase_history,
            }
        };

        let update = VisitUpdate {
            last_visit: now,
            last_emotion: emotion,
        };
        if let Err(e) = self.gateway.update_record(customer_id, &update).await {
            tracing::warn!(customer_id, error = %e, "visit record not written; suppressing");
            return VisitDecision::Suppress(SuppressReason::Unresolved);
        }

        if matches!(decision, VisitDecision::Notify { .. }) {
            self.in_flight().insert(customer_id.to_string());
        }
        decision
    }

    /// Mark the customer's notification as fully scheduled.
    pub fn end_visit(&self, customer_id: &str) {
        self.in_flight().remove(customer_id);
    }

    /// Current visit record: durable fields plus the in-flight flag.
    pub async fn snapshot(&self, customer_id: &str) -> Result<VisitRecord, GatewayError> {
        let mut visit = self.gateway.read_record(customer_id).await?.visit;
        visit.notification_in_progress = self.in_flight().contains(customer_id);
        Ok(visit)
    }
}
