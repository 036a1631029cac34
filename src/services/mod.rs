// Catalog and customer records
pub mod accounts;
pub mod catalog;

// Carts and checkout
pub mod carts;
pub mod order_builder;

// Order lifecycle
pub mod fulfillment;
pub mod order_locks;
pub mod order_state;
pub mod orders;

// Payments
pub mod payment_gateway;
pub mod refunds;
pub mod webhooks;
