use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, PaymentStatus};
use crate::errors::ServiceError;
use crate::payments::{from_minor_units, to_minor_units, PaymentProcessor, RefundRequest};
use crate::services::order_state::PaymentOutcome;
use crate::services::orders::OrderService;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefundReason {
    Duplicate,
    Fraudulent,
    #[default]
    RequestedByCustomer,
    Abandoned,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RefundOrderRequest {
    pub order_id: Uuid,
    /// Defaults to the order total
    #[schema(value_type = Option<String>, example = "6.50")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: RefundReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RefundRecord {
    pub order_id: Uuid,
    pub refund_id: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub reason: RefundReason,
    pub status: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// Issues processor refunds for paid orders
#[derive(Clone)]
pub struct RefundCoordinator {
    processor: Arc<dyn PaymentProcessor>,
    orders: OrderService,
}

impl RefundCoordinator {
    pub fn new(processor: Arc<dyn PaymentProcessor>, orders: OrderService) -> Self {
        Self { processor, orders }
    }

    /// Holds the order lock across the processor call so a concurrent
    /// refund webhook waits for this write.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, reason = %request.reason))]
    pub async fn refund(&self, request: RefundOrderRequest) -> Result<RefundRecord, ServiceError> {
        let guard = self.orders.lock_order(request.order_id).await;
        let order = self.orders.get_order(request.order_id).await?;

        let (intent_id, amount_minor) = check_refundable(&order, request.amount)?;
        let amount = from_minor_units(amount_minor);
        let full = amount == order.total;

        let refund = self
            .processor
            .create_refund(RefundRequest {
                payment_intent_id: intent_id,
                amount_minor: (!full).then_some(amount_minor),
                reason: request.reason.to_string(),
                order_id: order.id,
                user_id: order.user_id,
            })
            .await?;

        let refunded_amount = if refund.amount > 0 {
            from_minor_units(refund.amount)
        } else {
            amount
        };
        if refunded_amount != amount {
            warn!(requested = %amount, refunded = %refunded_amount, "processor refunded a different amount");
        }

        let result = self
            .orders
            .apply_payment_outcome_locked(
                &guard,
                PaymentOutcome::Refunded {
                    refund_id: refund.id.clone(),
                    amount: refunded_amount,
                },
            )
            .await?;

        info!(refund_id = %refund.id, amount = %refunded_amount, applied = result.applied, "order refunded");
        Ok(RefundRecord {
            order_id: order.id,
            refund_id: refund.id,
            amount: refunded_amount,
            reason: request.reason,
            status: refund.status,
            refunded_at: result.order.refunded_at,
        })
    }
}

/// Payment intent to refund against and the amount in minor units, or why not
fn check_refundable(
    order: &order::Model,
    requested: Option<Decimal>,
) -> Result<(String, i64), ServiceError> {
    let intent_id = order
        .payment_intent_id
        .clone()
        .ok_or(ServiceError::NoPaymentFound(order.id))?;

    match order.payment_status {
        PaymentStatus::Succeeded => {}
        PaymentStatus::Refunded => {
            return Err(ServiceError::InvalidState(
                "Order has already been refunded".to_string(),
            ))
        }
        other => {
            return Err(ServiceError::InvalidState(format!(
                "Only paid orders can be refunded (payment is {other})"
            )))
        }
    }

    let amount = requested.unwrap_or(order.total);
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Refund amount must be greater than zero".to_string(),
        ));
    }
    if amount.normalize().scale() > 2 {
        return Err(ServiceError::ValidationError(format!(
            "Refund amount {amount} has more than two decimal places"
        )));
    }
    if amount > order.total {
        return Err(ServiceError::ValidationError(format!(
            "Refund amount {amount} exceeds order total {}",
            order.total
        )));
    }
    Ok((intent_id, to_minor_units(amount)?))
}
