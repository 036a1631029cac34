//! Pure order state machine.
//!
//! Nothing in here touches the database: transitions are planned against a
//! loaded [`order::Model`] and expressed as an [`OrderPatch`], which the
//! order service writes with a conditional update and the tests apply with
//! [`apply_patch`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::Set;

use crate::entities::order::{self, FulfillmentStatus, PaymentStatus};
use crate::errors::ServiceError;

/// Result of a payment attempt as reported by the processor
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Succeeded {
        payment_intent_id: String,
    },
    Processing {
        payment_intent_id: String,
    },
    Failed {
        payment_intent_id: String,
        message: Option<String>,
    },
    Refunded {
        refund_id: String,
        amount: Decimal,
    },
}

impl PaymentOutcome {
    pub fn target(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Succeeded { .. } => PaymentStatus::Succeeded,
            PaymentOutcome::Processing { .. } => PaymentStatus::Processing,
            PaymentOutcome::Failed { .. } => PaymentStatus::Failed,
            PaymentOutcome::Refunded { .. } => PaymentStatus::Refunded,
        }
    }

    /// Payment statuses this outcome may be applied from. Anything else is
    /// a duplicate or a superseded event.
    pub fn allowed_from(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentOutcome::Succeeded { .. } => &[
                PaymentStatus::Pending,
                PaymentStatus::Processing,
                PaymentStatus::Failed,
            ],
            PaymentOutcome::Processing { .. } => &[PaymentStatus::Pending],
            PaymentOutcome::Failed { .. } => &[PaymentStatus::Pending, PaymentStatus::Processing],
            PaymentOutcome::Refunded { .. } => &[PaymentStatus::Succeeded],
        }
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        match self {
            PaymentOutcome::Succeeded { payment_intent_id }
            | PaymentOutcome::Processing { payment_intent_id }
            | PaymentOutcome::Failed {
                payment_intent_id, ..
            } => Some(payment_intent_id),
            PaymentOutcome::Refunded { .. } => None,
        }
    }
}

/// Field-level changes to an order. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
    pub status: Option<FulfillmentStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_intent_id: Option<String>,
    pub is_paid: Option<bool>,
    pub paid_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears a previous error
    pub payment_error_message: Option<Option<String>>,
    pub refund_id: Option<String>,
    pub refund_amount: Option<Decimal>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        *self == OrderPatch::default()
    }

    /// Only the patched columns are `Set`, so the result is safe to hand to
    /// `update_many().set(..)`.
    pub fn into_active_model(self) -> order::ActiveModel {
        let mut am = order::ActiveModel::default();
        if let Some(status) = self.status {
            am.status = Set(status);
        }
        if let Some(payment_status) = self.payment_status {
            am.payment_status = Set(payment_status);
        }
        if let Some(intent) = self.payment_intent_id {
            am.payment_intent_id = Set(Some(intent));
        }
        if let Some(is_paid) = self.is_paid {
            am.is_paid = Set(is_paid);
        }
        if let Some(paid_at) = self.paid_at {
            am.paid_at = Set(Some(paid_at));
        }
        if let Some(message) = self.payment_error_message {
            am.payment_error_message = Set(message);
        }
        if let Some(refund_id) = self.refund_id {
            am.refund_id = Set(Some(refund_id));
        }
        if let Some(amount) = self.refund_amount {
            am.refund_amount = Set(Some(amount));
        }
        if let Some(refunded_at) = self.refunded_at {
            am.refunded_at = Set(Some(refunded_at));
        }
        if let Some(updated_at) = self.updated_at {
            am.updated_at = Set(updated_at);
        }
        am
    }
}

/// Applies a patch to an in-memory order and bumps its version
pub fn apply_patch(mut order: order::Model, patch: &OrderPatch) -> order::Model {
    if patch.is_empty() {
        return order;
    }
    if let Some(status) = patch.status {
        order.status = status;
    }
    if let Some(payment_status) = patch.payment_status {
        order.payment_status = payment_status;
    }
    if let Some(intent) = &patch.payment_intent_id {
        order.payment_intent_id = Some(intent.clone());
    }
    if let Some(is_paid) = patch.is_paid {
        order.is_paid = is_paid;
    }
    if let Some(paid_at) = patch.paid_at {
        order.paid_at = Some(paid_at);
    }
    if let Some(message) = &patch.payment_error_message {
        order.payment_error_message = message.clone();
    }
    if let Some(refund_id) = &patch.refund_id {
        order.refund_id = Some(refund_id.clone());
    }
    if let Some(amount) = patch.refund_amount {
        order.refund_amount = Some(amount);
    }
    if let Some(refunded_at) = patch.refunded_at {
        order.refunded_at = Some(refunded_at);
    }
    if let Some(updated_at) = patch.updated_at {
        order.updated_at = updated_at;
    }
    order.version += 1;
    order
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionPlan {
    Apply {
        patch: OrderPatch,
        /// Stock and cart reconciliation is due once the write lands
        reconcile: bool,
    },
    NoOp(String),
}

/// Works out what a payment outcome does to `order`
pub fn plan_payment_transition(
    order: &order::Model,
    outcome: &PaymentOutcome,
    now: DateTime<Utc>,
) -> TransitionPlan {
    let target = outcome.target();
    if !outcome.allowed_from().contains(&order.payment_status) {
        return TransitionPlan::NoOp(if order.payment_status == target {
            format!("payment already {target}")
        } else {
            format!("payment {} cannot move to {target}", order.payment_status)
        });
    }

    let cancelled = order.status == FulfillmentStatus::Cancelled;
    let mut patch = OrderPatch {
        payment_status: Some(target),
        updated_at: Some(now),
        ..Default::default()
    };
    let mut reconcile = false;

    match outcome {
        PaymentOutcome::Succeeded { payment_intent_id } => {
            // Only a failed attempt's intent is superseded by the one that paid
            if order.payment_intent_id.is_none() || order.payment_status == PaymentStatus::Failed {
                patch.payment_intent_id = Some(payment_intent_id.clone());
            }
            patch.is_paid = Some(true);
            patch.paid_at = Some(now);
            patch.payment_error_message = Some(None);
            // A cancelled order stays cancelled; the capture needs a refund
            if !cancelled {
                patch.status = Some(FulfillmentStatus::Processing);
                reconcile = true;
            }
        }
        PaymentOutcome::Processing { payment_intent_id } => {
            if order.payment_intent_id.is_none() {
                patch.payment_intent_id = Some(payment_intent_id.clone());
            }
        }
        PaymentOutcome::Failed {
            payment_intent_id,
            message,
        } => {
            if order.payment_intent_id.is_none() {
                patch.payment_intent_id = Some(payment_intent_id.clone());
            }
            patch.payment_error_message = Some(Some(
                message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Payment failed".to_string()),
            ));
            if !cancelled {
                patch.status = Some(FulfillmentStatus::PaymentFailed);
            }
        }
        PaymentOutcome::Refunded { refund_id, amount } => {
            patch.status = Some(FulfillmentStatus::Refunded);
            patch.refund_id = Some(refund_id.clone());
            patch.refund_amount = Some(*amount);
            patch.refunded_at = Some(now);
        }
    }

    TransitionPlan::Apply { patch, reconcile }
}

const MANUAL_TRANSITIONS: &[(FulfillmentStatus, FulfillmentStatus)] = &[
    (FulfillmentStatus::Pending, FulfillmentStatus::Cancelled),
    (FulfillmentStatus::Processing, FulfillmentStatus::Shipped),
    (FulfillmentStatus::Processing, FulfillmentStatus::Cancelled),
    (FulfillmentStatus::Shipped, FulfillmentStatus::Delivered),
];

/// Returns whether an administrator may move an order from `from` to `to`.
/// `Ok(false)` means the order already has that status.
pub fn check_manual_transition(
    from: FulfillmentStatus,
    to: FulfillmentStatus,
) -> Result<bool, ServiceError> {
    if from == to {
        return Ok(false);
    }
    if MANUAL_TRANSITIONS.contains(&(from, to)) {
        Ok(true)
    } else {
        Err(ServiceError::InvalidState(format!(
            "Order status cannot be changed from {from} to {to}"
        )))
    }
}

/// Statuses an order must not be in for a cancel to proceed
pub const NON_CANCELLABLE: &[FulfillmentStatus] = &[
    FulfillmentStatus::Shipped,
    FulfillmentStatus::Delivered,
    FulfillmentStatus::Refunded,
    FulfillmentStatus::Cancelled,
];

/// `Ok(false)` when the order is already cancelled
pub fn check_cancellable(status: FulfillmentStatus) -> Result<bool, ServiceError> {
    match status {
        FulfillmentStatus::Cancelled => Ok(false),
        FulfillmentStatus::Shipped | FulfillmentStatus::Delivered | FulfillmentStatus::Refunded => {
            Err(ServiceError::InvalidState(format!(
                "Order is {status} and can no longer be cancelled"
            )))
        }
        _ => Ok(true),
    }
}
