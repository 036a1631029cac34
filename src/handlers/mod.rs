pub mod carts;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::payments::{PaymentProcessor, WebhookVerifier};
use crate::services::{
    accounts::AccountService,
    carts::CartService,
    catalog::{CatalogStore, DbCatalogStore},
    fulfillment::FulfillmentReconciler,
    order_builder::OrderBuilder,
    orders::OrderService,
    payment_gateway::PaymentGateway,
    refunds::RefundCoordinator,
    webhooks::WebhookProcessor,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: CartService,
    pub orders: OrderService,
    pub order_builder: OrderBuilder,
    pub payments: PaymentGateway,
    pub refunds: RefundCoordinator,
    pub webhooks: WebhookProcessor,
    pub webhook_verifier: Arc<WebhookVerifier>,
}

impl AppServices {
    /// Wires every service over one pool and one processor client
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        processor: Arc<dyn PaymentProcessor>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let catalog: Arc<dyn CatalogStore> = Arc::new(DbCatalogStore::new(db_pool.clone()));
        let accounts = AccountService::new(db_pool.clone());
        let carts = CartService::new(
            db_pool.clone(),
            catalog.clone(),
            config.guest_cart_ttl(),
            event_sender.clone(),
        );
        let reconciler =
            FulfillmentReconciler::new(db_pool.clone(), catalog.clone(), event_sender.clone());
        let orders = OrderService::new(db_pool.clone(), reconciler, event_sender.clone());
        let order_builder = OrderBuilder::new(
            db_pool,
            catalog,
            carts.clone(),
            accounts.clone(),
            config.currency(),
            event_sender,
        );

        Self {
            payments: PaymentGateway::new(processor.clone(), orders.clone(), accounts),
            refunds: RefundCoordinator::new(processor, orders.clone()),
            webhooks: WebhookProcessor::new(orders.clone()),
            webhook_verifier: Arc::new(WebhookVerifier::new(
                config.payment_webhook_secret.clone(),
                config.payment_webhook_tolerance_secs,
            )),
            carts,
            orders,
            order_builder,
        }
    }
}
