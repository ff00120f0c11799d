use kiosk_core::{PurchaseItem, VisitRecord};
use kiosk_store::{CustomerDocument, CustomerStore, StoreError, VisitUpdate};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Transient failures persisted through every attempt.
    #[error("store unavailable after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: String },
    /// A non-transient failure; not retried.
    #[error("store rejected request: {0}")]
    Rejected(StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    /// Double the delay after each failed attempt, up to `cap`.
    Exponential { cap: Duration },
}

/// Retry policy shared by every gateway call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    pub attempt_timeout: Duration,
    pub retryable: fn(&StoreError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            backoff: Backoff::Fixed,
            attempt_timeout: Duration::from_secs(5),
            retryable: StoreError::is_transient,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based).
    fn delay_before(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { cap } => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor).min(cap)
            }
        }
    }
}

/// Durable visit fields of one customer plus what notifications need.
#[derive(Debug, Clone)]
pub struct CustomerRecord {
    pub visit: VisitRecord,
    pub purchase_history: Vec<PurchaseItem>,
}

impl CustomerRecord {
    fn from_document(doc: CustomerDocument) -> Self {
        Self {
            visit: VisitRecord {
                customer_id: doc.id,
                last_visit_timestamp: doc.last_visit,
                last_emotion: doc.last_emotion,
                notification_in_progress: false,
            },
            purchase_history: doc.purchase_history,
        }
    }
}

pub struct PersistenceGateway {
    store: Arc<dyn CustomerStore>,
    policy: RetryPolicy,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn CustomerStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Read a customer's visit record. A missing customer is `Rejected`.
    pub async fn read_record(&self, customer_id: &str) -> Result<CustomerRecord, GatewayError> {
        let doc = self
            .with_retry("read", customer_id, || self.store.get(customer_id))
            .await?;
        doc.map(CustomerRecord::from_document)
            .ok_or_else(|| GatewayError::Rejected(StoreError::NotFound(customer_id.to_string())))
    }

    /// Write the visit fields of one customer.
    pub async fn update_record(
        &self,
        customer_id: &str,
        update: &VisitUpdate,
    ) -> Result<(), GatewayError> {
        self.with_retry("update", customer_id, || {
            self.store.record_visit(customer_id, update)
        })
        .await
    }

    /// Every customer document, for building the registry at startup.
    pub async fn load_registry_documents(&self) -> Result<Vec<CustomerDocument>, GatewayError> {
        self.with_retry("list", "*", || self.store.list()).await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        customer_id: &str,
        mut attempt: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut n = 0;
        loop {
            n += 1;
            let err = match tokio::time::timeout(self.policy.attempt_timeout, attempt()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => StoreError::Unavailable(format!(
                    "attempt timed out after {:?}",
                    self.policy.attempt_timeout
                )),
            };

            if !(self.policy.retryable)(&err) {
                return Err(GatewayError::Rejected(err));
            }
            if n >= max_attempts {
                tracing::warn!(
                    op,
                    customer_id,
                    attempts = n,
                    error = %err,
                    "store retries exhausted"
                );
                return Err(GatewayError::Unavailable {
                    attempts: n,
                    last: err.to_string(),
                });
            }

            let wait = self.policy.delay_before(n);
            tracing::debug!(
                op,
                customer_id,
                attempt = n,
                error = %err,
                ?wait,
                "transient store failure; retrying"
            );
            tokio::time::sleep(wait).await;
        }
    }
}
