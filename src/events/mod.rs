use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::{FulfillmentStatus, PaymentStatus};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes without failing the caller; delivery problems are only logged
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "domain event dropped");
        }
    }
}

/// Domain events emitted by the order/payment lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total: Decimal,
    },
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: FulfillmentStatus,
        new_status: FulfillmentStatus,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
    },
    PaymentSucceeded {
        order_id: Uuid,
        payment_intent_id: String,
    },
    PaymentFailed {
        order_id: Uuid,
        message: String,
    },
    OrderRefunded {
        order_id: Uuid,
        refund_id: String,
        amount: Decimal,
    },
    StockDecremented {
        product_id: Uuid,
        quantity: i32,
        remaining: i32,
    },
    GuestCartTransferred {
        user_id: Uuid,
        lines: usize,
    },
}

/// Drains the event channel until every sender is dropped
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockDecremented {
                product_id,
                remaining,
                ..
            } if *remaining == 0 => {
                warn!(product_id = %product_id, "product is out of stock");
            }
            Event::PaymentFailed { order_id, message } => {
                warn!(order_id = %order_id, message = %message, "payment failed");
            }
            _ => {}
        }
        info!(event = ?event, "domain event");
    }

    info!("Event processing loop stopped");
}
