use crate::dispatch::{NotificationDispatcher, NotificationRequest};
use crate::status::KioskStats;
use crate::visits::{SuppressReason, VisitDecision, VisitStateStore};
use kiosk_core::{Emotion, Registry};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

/// A face the matcher accepted, with the emotion read from the same crop.
#[derive(Debug, Clone)]
pub struct AcceptedMatch {
    pub customer_id: String,
    pub emotion: Emotion,
    pub distance_score: f32,
}

pub struct Greeter {
    registry: Arc<Registry>,
    visits: Arc<VisitStateStore>,
    dispatcher: NotificationDispatcher,
    stats: Arc<KioskStats>,
    /// Customers with a visit task queued or running.
    pending: Mutex<HashSet<String>>,
}

/// Releases the customer's pending slot when the visit task ends.
struct PendingVisit {
    greeter: Arc<Greeter>,
    customer_id: String,
}

impl Drop for PendingVisit {
    fn drop(&mut self) {
        self.greeter.pending().remove(&self.customer_id);
    }
}

impl Greeter {
    pub fn new(
        registry: Arc<Registry>,
        visits: Arc<VisitStateStore>,
        dispatcher: NotificationDispatcher,
        stats: Arc<KioskStats>,
    ) -> Self {
        Self {
            registry,
            visits,
            dispatcher,
            stats,
            pending: Mutex::new(HashSet::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn a visit task for `accepted` on `tracker`, unless one is already
    /// queued or running for the same customer. At most one task per known
    /// customer exists at any time. Returns whether a task was spawned.
    pub fn hand_off(
        self: &Arc<Self>,
        accepted: AcceptedMatch,
        tracker: &TaskTracker,
        runtime: &Handle,
    ) -> bool {
        if !self.pending().insert(accepted.customer_id.clone()) {
            tracing::debug!(
                customer_id = %accepted.customer_id,
                "visit already pending; match coalesced"
            );
            KioskStats::bump(&self.stats.coalesced);
            return false;
        }

        let slot = PendingVisit {
            greeter: Arc::clone(self),
            customer_id: accepted.customer_id.clone(),
        };
        tracker.spawn_on(
            async move {
                slot.greeter.on_match(accepted).await;
                drop(slot);
            },
            runtime,
        );
        true
    }

    /// Record the visit and, if it qualifies, schedule the notifications.
    pub async fn on_match(&self, accepted: AcceptedMatch) -> VisitDecision {
        let id = accepted.customer_id.as_str();
        tracing::debug!(customer_id = id, distance = accepted.distance_score, "visit started");
        let decision = self.visits.begin_visit(id, accepted.emotion).await;

        match &decision {
            VisitDecision::Notify { purchase_history } => {
                match self.registry.get(id) {
                    Some(customer) => {
                        self.dispatcher.dispatch(NotificationRequest {
                            customer_id: customer.customer_id.clone(),
                            display_name: customer.display_name.clone(),
                            emotion: accepted.emotion,
                            phone_number: customer.phone_number.clone(),
                            purchase_history: purchase_history.clone(),
                        });
                        KioskStats::bump(&self.stats.notified);
                    }
                    None => {
                        tracing::warn!(customer_id = id, "matched customer missing from registry")
                    }
                }
                self.visits.end_visit(id);
            }
            VisitDecision::Suppress(reason) => {
                tracing::debug!(customer_id = id, reason = reason.as_str(), "visit suppressed");
                let counter = match reason {
                    SuppressReason::Unresolved => &self.stats.unresolved,
                    SuppressReason::RecentVisit | SuppressReason::InFlight => {
                        &self.stats.suppressed
                    }
                };
                KioskStats::bump(counter);
            }
        }
        decision
    }
}
