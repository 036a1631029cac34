use metrics::counter;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::order;
use crate::errors::ServiceError;
use crate::payments::{PaymentEvent, WebhookEvent};
use crate::services::orders::OrderService;

/// What happened to one delivered webhook event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    Applied { order_id: Uuid },
    /// Duplicate or out-of-order delivery; the order already reflects it
    NoOp { order_id: Uuid },
    Ignored { event_type: String },
    OrderNotFound,
    /// The transition could not be stored; logged and acknowledged anyway
    Failed { order_id: Option<Uuid> },
}

/// Routes verified processor events onto orders
#[derive(Clone)]
pub struct WebhookProcessor {
    orders: OrderService,
}

impl WebhookProcessor {
    pub fn new(orders: OrderService) -> Self {
        Self { orders }
    }

    /// Applies one verified event. Every outcome, failures included, is
    /// acknowledged to the processor.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process(&self, event: &WebhookEvent) -> WebhookDisposition {
        counter!("pantry.webhook.received", 1);
        let classified = event.classify();

        let Some(outcome) = classified.outcome() else {
            counter!("pantry.webhook.ignored", 1);
            return WebhookDisposition::Ignored {
                event_type: event.event_type.clone(),
            };
        };

        let order = match self.resolve_order(&classified).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(
                    payment_intent_id = ?classified.payment_intent_id(),
                    "webhook event does not match any order"
                );
                counter!("pantry.webhook.ignored", 1);
                return WebhookDisposition::OrderNotFound;
            }
            Err(e) => {
                error!(error = %e, "could not look up the order for a webhook event");
                counter!("pantry.webhook.failed", 1);
                return WebhookDisposition::Failed {
                    order_id: classified.order_id(),
                };
            }
        };

        if let (Some(incoming), Some(stored)) =
            (classified.payment_intent_id(), order.payment_intent_id.as_deref())
        {
            if incoming != stored {
                info!(incoming, stored, "event references a different payment intent than stored");
            }
        }

        match self.orders.apply_payment_outcome(order.id, outcome).await {
            Ok(result) if result.applied => {
                counter!("pantry.webhook.applied", 1);
                WebhookDisposition::Applied { order_id: order.id }
            }
            Ok(_) => {
                counter!("pantry.webhook.noop", 1);
                WebhookDisposition::NoOp { order_id: order.id }
            }
            Err(e) => {
                error!(error = %e, "webhook event could not be applied");
                counter!("pantry.webhook.failed", 1);
                WebhookDisposition::Failed {
                    order_id: Some(order.id),
                }
            }
        }
    }

    /// Metadata order id first, then the stored payment intent id
    async fn resolve_order(
        &self,
        event: &PaymentEvent,
    ) -> Result<Option<order::Model>, ServiceError> {
        if let Some(order_id) = event.order_id() {
            match self.orders.get_order(order_id).await {
                Ok(order) => return Ok(Some(order)),
                Err(ServiceError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        match event.payment_intent_id() {
            Some(intent_id) => self.orders.find_by_payment_intent(intent_id).await,
            None => Ok(None),
        }
    }
}
