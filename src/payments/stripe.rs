use async_trait::async_trait;
use metrics::counter;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{
    CustomerRequest, PaymentIntent, PaymentIntentRequest, PaymentProcessor, ProcessorCustomer,
    ProcessorError, ProcessorPaymentMethod, ProcessorRefund, RefundRequest,
    ORDER_ID_METADATA_KEY, USER_ID_METADATA_KEY,
};
use crate::config::AppConfig;

/// Thin REST client for the Stripe API. Built once at startup and shared.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Vec<T>,
}

impl StripeClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, ProcessorError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ProcessorError> {
        let api_key = config
            .payment_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProcessorError::NotConfigured)?;
        Self::new(
            config.payment_api_base_url.clone(),
            api_key,
            config.payment_api_timeout(),
        )
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ProcessorError> {
        counter!("pantry.processor.calls", 1, "operation" => operation);
        let response = request.send().await?;
        decode(operation, response).await
    }
}

async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> Result<T, ProcessorError> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        counter!("pantry.processor.errors", 1, "operation" => operation);
        let (code, message) = match serde_json::from_slice::<ErrorEnvelope>(&body) {
            Ok(envelope) => (
                envelope.error.code,
                envelope
                    .error
                    .message
                    .or(envelope.error.kind)
                    .unwrap_or_else(|| status.to_string()),
            ),
            Err(_) => (None, status.to_string()),
        };
        return Err(ProcessorError::Api {
            status: status.as_u16(),
            code,
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|e| ProcessorError::Decode(e.to_string()))
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    async fn create_customer(
        &self,
        request: CustomerRequest,
    ) -> Result<ProcessorCustomer, ProcessorError> {
        let params = vec![
            ("email".to_string(), request.email),
            ("name".to_string(), request.name),
            (
                format!("metadata[{USER_ID_METADATA_KEY}]"),
                request.user_id.to_string(),
            ),
        ];
        self.send("create_customer", self.post("/v1/customers").form(&params))
            .await
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ProcessorError> {
        let mut params = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency),
            ("customer".to_string(), request.customer_id),
            ("description".to_string(), request.description),
            (
                format!("metadata[{ORDER_ID_METADATA_KEY}]"),
                request.order_id.to_string(),
            ),
            (
                format!("metadata[{USER_ID_METADATA_KEY}]"),
                request.user_id.to_string(),
            ),
        ];
        if let Some(email) = request.receipt_email {
            params.push(("receipt_email".to_string(), email));
        }
        match request.payment_method_id {
            Some(pm) => {
                params.push(("payment_method".to_string(), pm));
                params.push(("confirm".to_string(), "true".to_string()));
                params.push((
                    "automatic_payment_methods[enabled]".to_string(),
                    "true".to_string(),
                ));
                params.push((
                    "automatic_payment_methods[allow_redirects]".to_string(),
                    "never".to_string(),
                ));
            }
            None => {
                params.push((
                    "automatic_payment_methods[enabled]".to_string(),
                    "true".to_string(),
                ));
            }
        }
        debug!("creating payment intent");
        self.send(
            "create_payment_intent",
            self.post("/v1/payment_intents").form(&params),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.send(
            "retrieve_payment_intent",
            self.get(&format!("/v1/payment_intents/{intent_id}")),
        )
        .await
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_refund(
        &self,
        request: RefundRequest,
    ) -> Result<ProcessorRefund, ProcessorError> {
        let idempotency_key = format!(
            "refund-{}-{}",
            request.order_id,
            request
                .amount_minor
                .map_or_else(|| "full".to_string(), |a| a.to_string())
        );
        let mut params = vec![
            ("payment_intent".to_string(), request.payment_intent_id),
            ("reason".to_string(), request.reason),
            (
                format!("metadata[{ORDER_ID_METADATA_KEY}]"),
                request.order_id.to_string(),
            ),
            (
                format!("metadata[{USER_ID_METADATA_KEY}]"),
                request.user_id.to_string(),
            ),
        ];
        if let Some(amount) = request.amount_minor {
            params.push(("amount".to_string(), amount.to_string()));
        }
        self.send(
            "create_refund",
            self.post("/v1/refunds")
                .header("Idempotency-Key", idempotency_key)
                .form(&params),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<ProcessorPaymentMethod>, ProcessorError> {
        let list: ListEnvelope<ProcessorPaymentMethod> = self
            .send(
                "list_payment_methods",
                self.get("/v1/payment_methods")
                    .query(&[("customer", customer_id), ("type", "card")]),
            )
            .await?;
        Ok(list.data)
    }
}
