use metrics::counter;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::db::DbPool;
use crate::entities::order;
use crate::events::{Event, EventSender};
use crate::services::carts::CartService;
use crate::services::catalog::{CatalogStore, StockLevel};

/// Summary of one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub stock_updates: Vec<StockLevel>,
    pub stock_failures: usize,
    pub cart_lines_removed: usize,
    pub cart_cleanup_failed: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.stock_failures == 0 && !self.cart_cleanup_failed
    }
}

/// Post-payment bookkeeping: stock decrements and cart cleanup. Best-effort;
/// the order row stays the source of truth even when a step fails.
#[derive(Clone)]
pub struct FulfillmentReconciler {
    db_pool: Arc<DbPool>,
    catalog: Arc<dyn CatalogStore>,
    event_sender: Option<Arc<EventSender>>,
}

impl FulfillmentReconciler {
    pub fn new(
        db_pool: Arc<DbPool>,
        catalog: Arc<dyn CatalogStore>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            catalog,
            event_sender,
        }
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn reconcile(&self, order: &order::Model) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for line in order.line_items.iter() {
            match self.catalog.decrement_stock(line.product_id, line.quantity).await {
                Ok(level) => {
                    if let Some(sender) = &self.event_sender {
                        sender
                            .send_or_log(Event::StockDecremented {
                                product_id: level.product_id,
                                quantity: line.quantity,
                                remaining: level.remaining,
                            })
                            .await;
                    }
                    report.stock_updates.push(level);
                }
                Err(e) => {
                    error!(product_id = %line.product_id, error = %e, "stock decrement failed");
                    counter!("pantry.fulfillment.stock_failures", 1);
                    report.stock_failures += 1;
                }
            }
        }

        if let Some(cart_id) = order.cart_id {
            let purchased: Vec<_> = order
                .line_items
                .iter()
                .map(|l| (l.product_id, l.quantity))
                .collect();
            match CartService::remove_purchased_lines(&*self.db_pool, cart_id, &purchased).await {
                Ok(removed) => report.cart_lines_removed = removed,
                Err(e) => {
                    warn!(cart_id = %cart_id, error = %e, "failed to clear purchased cart lines");
                    report.cart_cleanup_failed = true;
                }
            }
        }

        info!(
            stock_updates = report.stock_updates.len(),
            stock_failures = report.stock_failures,
            cart_lines_removed = report.cart_lines_removed,
            "order reconciled"
        );
        report
    }
}
