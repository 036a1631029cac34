use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::order::{self, FulfillmentStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::payments::{
    outcome_from_intent, to_minor_units, PaymentIntentRequest, PaymentProcessor,
};
use crate::services::accounts::AccountService;
use crate::services::orders::OrderService;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreatePaymentIntentRequest {
    pub order_id: Uuid,
    /// Saved payment method to charge immediately; omit to confirm client-side
    pub payment_method_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentIntentResponse {
    pub client_secret: Option<String>,
    pub payment_intent_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ConfirmPaymentRequest {
    pub order_id: Uuid,
    pub payment_intent_id: String,
}

#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub order: order::Model,
    pub applied: bool,
    pub intent_status: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SavedPaymentMethod {
    pub id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<u32>,
    pub exp_year: Option<u32>,
}

/// Creates and confirms processor payment intents for orders
#[derive(Clone)]
pub struct PaymentGateway {
    processor: Arc<dyn PaymentProcessor>,
    orders: OrderService,
    accounts: AccountService,
}

impl PaymentGateway {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        orders: OrderService,
        accounts: AccountService,
    ) -> Self {
        Self {
            processor,
            orders,
            accounts,
        }
    }

    /// Starts a payment for an order. The order row is left alone; its
    /// state only moves when the processor reports back.
    #[instrument(skip(self, caller, request), fields(order_id = %request.order_id, user_id = %caller.user_id))]
    pub async fn create_intent(
        &self,
        caller: &AuthUser,
        request: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        let order = self.orders.get_order_for(request.order_id, caller).await?;
        ensure_payable(&order)?;

        let payment_method = match request.payment_method_id {
            Some(id) => Some(
                self.accounts
                    .owned_payment_method(order.user_id, id)
                    .await?
                    .processor_payment_method_id,
            ),
            None => None,
        };

        let user = self.accounts.find_user(order.user_id).await?;
        let customer_id = self
            .accounts
            .ensure_processor_customer(&user, self.processor.as_ref())
            .await?;

        let intent = self
            .processor
            .create_payment_intent(PaymentIntentRequest {
                amount_minor: to_minor_units(order.total)?,
                currency: order.currency.clone(),
                customer_id,
                payment_method_id: payment_method,
                order_id: order.id,
                user_id: order.user_id,
                receipt_email: Some(user.email.clone()),
                description: format!("Order {}", order.id),
            })
            .await?;

        info!(payment_intent_id = %intent.id, status = %intent.status, "payment intent created");
        Ok(PaymentIntentResponse {
            client_secret: intent.client_secret,
            payment_intent_id: intent.id,
            status: intent.status,
        })
    }

    /// Pulls the intent from the processor and applies what it says through
    /// the same idempotent path the webhook uses.
    #[instrument(skip(self, caller, request), fields(order_id = %request.order_id))]
    pub async fn confirm_payment(
        &self,
        caller: &AuthUser,
        request: ConfirmPaymentRequest,
    ) -> Result<ConfirmOutcome, ServiceError> {
        let order = self.orders.get_order_for(request.order_id, caller).await?;
        let intent = self
            .processor
            .retrieve_payment_intent(&request.payment_intent_id)
            .await?;

        if intent.order_id() != Some(order.id) {
            return Err(ServiceError::ValidationError(
                "Payment intent does not belong to this order".to_string(),
            ));
        }

        let Some(outcome) = outcome_from_intent(&intent) else {
            return Ok(ConfirmOutcome {
                order,
                applied: false,
                intent_status: intent.status,
            });
        };

        let result = self.orders.apply_payment_outcome(order.id, outcome).await?;
        Ok(ConfirmOutcome {
            order: result.order,
            applied: result.applied,
            intent_status: intent.status,
        })
    }

    /// Cards saved with the processor for the caller
    pub async fn list_payment_methods(
        &self,
        caller: &AuthUser,
    ) -> Result<Vec<SavedPaymentMethod>, ServiceError> {
        let user = self.accounts.find_user(caller.user_id).await?;
        let Some(customer_id) = user.processor_customer_id else {
            return Ok(Vec::new());
        };

        let methods = self.processor.list_payment_methods(&customer_id).await?;
        Ok(methods
            .into_iter()
            .map(|pm| SavedPaymentMethod {
                id: pm.id,
                brand: pm.card.as_ref().map(|c| c.brand.clone()),
                last4: pm.card.as_ref().map(|c| c.last4.clone()),
                exp_month: pm.card.as_ref().map(|c| c.exp_month),
                exp_year: pm.card.as_ref().map(|c| c.exp_year),
            })
            .collect())
    }
}

fn ensure_payable(order: &order::Model) -> Result<(), ServiceError> {
    if order.status == FulfillmentStatus::Cancelled {
        return Err(ServiceError::InvalidState(
            "Order is cancelled and cannot be paid".to_string(),
        ));
    }
    match order.payment_status {
        PaymentStatus::Succeeded | PaymentStatus::Refunded => Err(ServiceError::InvalidState(
            format!("Order payment already {}", order.payment_status),
        )),
        _ => Ok(()),
    }
}
