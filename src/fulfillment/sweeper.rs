//! Background expiry sweep.
//!
//! Releases reservations whose TTL elapsed without a commit, which bounds how
//! long an abandoned order attempt can hold stock.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use crate::fulfillment::manager::OrderTransactionManager;

pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the loop to stop and waits for the in-progress sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "sweeper task ended abnormally");
        }
    }
}

pub fn spawn(manager: OrderTransactionManager, interval: Duration) -> SweeperHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(sweep_loop(manager, interval, shutdown_rx));
    info!(interval_secs = interval.as_secs(), "reservation sweeper started");
    SweeperHandle { shutdown_tx, task }
}

async fn sweep_loop(manager: OrderTransactionManager, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
        match manager.sweep(Utc::now()) {
            Ok(report) if report.expired_reservations > 0 => info!(
                expired = report.expired_reservations,
                forgotten_keys = report.forgotten_keys,
                purged = report.purged_reservations,
                "sweep released expired reservations"
            ),
            Ok(report) => debug!(forgotten_keys = report.forgotten_keys, purged = report.purged_reservations, "sweep complete"),
            Err(e) => error!(error = %e, "sweep failed"),
        }
    }
    info!("reservation sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryCatalog, InMemoryOrderStore, SandboxPaymentGateway, TracingNotifier};
    use crate::domain::aggregates::{AssignedLine, WarehouseAssignment};
    use crate::fulfillment::inventory::InventoryReservationCoordinator;
    use crate::fulfillment::manager::{ManagerDeps, ManagerPolicies};
    use crate::fulfillment::pricing::{PricingEngine, TierTable};
    use crate::fulfillment::routing::WarehouseRouter;
    use crate::fulfillment::tax_shipping::TaxShippingCalculator;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweeper_releases_and_stops() {
        let inventory = Arc::new(InventoryReservationCoordinator::new(chrono::Duration::zero()));
        inventory.restock(&"P1".into(), &"WH-A".into(), 5).unwrap();
        let manager = OrderTransactionManager::new(ManagerDeps {
            catalog: Arc::new(InMemoryCatalog::new("NGN", vec![])),
            router: WarehouseRouter::default(),
            inventory: Arc::clone(&inventory),
            pricing: PricingEngine::new(TierTable::default()),
            tax_shipping: TaxShippingCalculator::default(),
            payments: Arc::new(SandboxPaymentGateway::new()),
            store: Arc::new(InMemoryOrderStore::new()),
            notifier: Arc::new(TracingNotifier),
            policies: ManagerPolicies::default(),
        });
        let assignment = WarehouseAssignment {
            warehouse_id: "WH-A".into(),
            lines: vec![AssignedLine { product_id: "P1".into(), quantity: 5 }],
            same_day_dispatch: false,
        };
        inventory.reserve(&[assignment]).unwrap();

        let handle = spawn(manager, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;
        assert_eq!(inventory.level(&"P1".into(), &"WH-A".into()).unwrap().unwrap().reserved, 0);
    }
}
