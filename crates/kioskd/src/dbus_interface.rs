use crate::gateway::GatewayError;
use crate::status::KioskStats;
use crate::visits::VisitStateStore;
use kiosk_store::StoreError;
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.smartkiosk.Greeter1";
pub const OBJECT_PATH: &str = "/org/smartkiosk/Greeter1";

/// D-Bus interface for the kiosk daemon.
///
/// Bus name: org.smartkiosk.Greeter1
/// Object path: /org/smartkiosk/Greeter1
pub struct GreeterService {
    stats: Arc<KioskStats>,
    visits: Arc<VisitStateStore>,
}

impl GreeterService {
    pub fn new(stats: Arc<KioskStats>, visits: Arc<VisitStateStore>) -> Self {
        Self { stats, visits }
    }
}

#[interface(name = "org.smartkiosk.Greeter1")]
impl GreeterService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.stats.to_json().to_string())
    }

    /// Current visit record of one customer.
    async fn visit_record(&self, customer_id: &str) -> zbus::fdo::Result<String> {
        tracing::debug!(customer_id, "visit_record requested");
        match self.visits.snapshot(customer_id).await {
            Ok(record) => serde_json::to_string(&record)
                .map_err(|e| zbus::fdo::Error::Failed(format!("encode record: {e}"))),
            Err(GatewayError::Rejected(StoreError::NotFound(_))) => Err(
                zbus::fdo::Error::InvalidArgs(format!("unknown customer: {customer_id}")),
            ),
            Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
        }
    }
}
