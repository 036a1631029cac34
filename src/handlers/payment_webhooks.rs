use axum::{extract::State, http::HeaderMap, response::Json};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::payments::{WebhookEvent, SIGNATURE_HEADER};
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    summary = "Payment processor webhook",
    description = "Signed processor callback. Acknowledged with 200 once verified and parsed, including events that match no order or could not be applied.",
    request_body = String,
    params(("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")),
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookAck),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = state.services.webhook_verifier.verify(signature, &body) {
        warn!(error = %e, "payment webhook signature verification failed");
        metrics::counter!("pantry.webhook.rejected", 1);
        return Err(e.into());
    }

    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        metrics::counter!("pantry.webhook.rejected", 1);
        ServiceError::ValidationError(format!("Invalid webhook payload: {e}"))
    })?;

    let disposition = state.services.webhooks.process(&event).await;
    debug!(event_id = %event.id, ?disposition, "webhook processed");

    Ok(Json(WebhookAck { received: true }))
}
