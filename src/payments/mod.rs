//! Payment processor seam.
//!
//! The rest of the crate only talks to [`PaymentProcessor`]; the Stripe
//! implementation lives in [`stripe`] and inbound event authentication in
//! [`webhook`].

pub mod stripe;
pub mod webhook;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::order_state::PaymentOutcome;

pub use stripe::StripeClient;
pub use webhook::{
    compute_signature, PaymentEvent, SignatureError, WebhookEvent, WebhookVerifier, SIGNATURE_HEADER,
};

/// Metadata key carrying the order id on processor objects
pub const ORDER_ID_METADATA_KEY: &str = "order_id";
pub const USER_ID_METADATA_KEY: &str = "user_id";

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("processor transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("processor returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("could not decode processor response: {0}")]
    Decode(String),

    #[error("payment processor is not configured")]
    NotConfigured,
}

impl From<ProcessorError> for ServiceError {
    fn from(err: ProcessorError) -> Self {
        tracing::warn!(error = %err, "payment processor call failed");
        let message = match &err {
            // Card declines and similar are safe to surface
            ProcessorError::Api {
                status: 402,
                message,
                ..
            } => message.clone(),
            ProcessorError::NotConfigured => "Payment processing is unavailable".to_string(),
            _ => "Payment processor request failed".to_string(),
        };
        ServiceError::ExternalServiceError(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerRequest {
    pub email: String,
    pub name: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessorCustomer {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntentRequest {
    /// Amount in the currency's minor unit (cents)
    pub amount_minor: i64,
    pub currency: String,
    pub customer_id: String,
    /// When present the intent is confirmed immediately
    pub payment_method_id: Option<String>,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub receipt_email: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentError {
    pub message: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
    #[serde(default)]
    pub latest_charge: Option<String>,
}

impl PaymentIntent {
    /// Order correlated with this intent, if the metadata carries a valid id
    pub fn order_id(&self) -> Option<Uuid> {
        self.metadata
            .get(ORDER_ID_METADATA_KEY)
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub payment_intent_id: String,
    /// `None` refunds the full captured amount
    pub amount_minor: Option<i64>,
    pub reason: String,
    pub order_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessorRefund {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CardDetails {
    pub brand: String,
    pub last4: String,
    pub exp_month: u32,
    pub exp_year: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessorPaymentMethod {
    pub id: String,
    #[serde(default)]
    pub card: Option<CardDetails>,
}

/// Operations this service needs from the payment processor
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_customer(
        &self,
        request: CustomerRequest,
    ) -> Result<ProcessorCustomer, ProcessorError>;

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ProcessorError>;

    async fn retrieve_payment_intent(&self, intent_id: &str)
        -> Result<PaymentIntent, ProcessorError>;

    async fn create_refund(&self, request: RefundRequest)
        -> Result<ProcessorRefund, ProcessorError>;

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<ProcessorPaymentMethod>, ProcessorError>;
}

/// Stand-in used when no processor key is configured; every call fails
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProcessor;

#[async_trait]
impl PaymentProcessor for DisabledProcessor {
    async fn create_customer(
        &self,
        _request: CustomerRequest,
    ) -> Result<ProcessorCustomer, ProcessorError> {
        Err(ProcessorError::NotConfigured)
    }

    async fn create_payment_intent(
        &self,
        _request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ProcessorError> {
        Err(ProcessorError::NotConfigured)
    }

    async fn retrieve_payment_intent(
        &self,
        _intent_id: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        Err(ProcessorError::NotConfigured)
    }

    async fn create_refund(
        &self,
        _request: RefundRequest,
    ) -> Result<ProcessorRefund, ProcessorError> {
        Err(ProcessorError::NotConfigured)
    }

    async fn list_payment_methods(
        &self,
        _customer_id: &str,
    ) -> Result<Vec<ProcessorPaymentMethod>, ProcessorError> {
        Err(ProcessorError::NotConfigured)
    }
}

/// Converts a major-unit amount to the processor's integer minor unit
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let cents = (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    i64::try_from(cents)
        .map_err(|_| ServiceError::ValidationError(format!("Amount {amount} is out of range")))
}

pub fn from_minor_units(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

/// Maps a retrieved intent onto a lifecycle outcome. Intents still waiting
/// on the customer produce `None`.
pub fn outcome_from_intent(intent: &PaymentIntent) -> Option<PaymentOutcome> {
    match intent.status.as_str() {
        "succeeded" => Some(PaymentOutcome::Succeeded {
            payment_intent_id: intent.id.clone(),
        }),
        "processing" => Some(PaymentOutcome::Processing {
            payment_intent_id: intent.id.clone(),
        }),
        "requires_payment_method" => {
            intent
                .last_payment_error
                .as_ref()
                .map(|err| PaymentOutcome::Failed {
                    payment_intent_id: intent.id.clone(),
                    message: err.message.clone(),
                })
        }
        "canceled" => Some(PaymentOutcome::Failed {
            payment_intent_id: intent.id.clone(),
            message: Some("Payment was canceled".to_string()),
        }),
        _ => None,
    }
}
