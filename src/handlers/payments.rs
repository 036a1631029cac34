use axum::{extract::State, response::Json};
use serde::Serialize;
use utoipa::ToSchema;

use super::common::AppJson;
use super::orders::OrderResponse;
use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::payment_gateway::{
    ConfirmPaymentRequest, CreatePaymentIntentRequest, PaymentIntentResponse, SavedPaymentMethod,
};
use crate::services::refunds::{RefundOrderRequest, RefundRecord};
use crate::{ApiResponse, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmPaymentResponse {
    pub order: OrderResponse,
    /// False when the order already reflected the processor's state
    pub applied: bool,
    pub intent_status: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/create-payment-intent",
    summary = "Create payment intent",
    description = "Creates a processor payment intent for the order total. Order state changes only when the processor reports back.",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 200, description = "Intent created", body = ApiResponse<PaymentIntentResponse>),
        (status = 400, description = "Order cannot be paid or payment method invalid", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not the caller's order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(request): AppJson<CreatePaymentIntentRequest>,
) -> Result<Json<ApiResponse<PaymentIntentResponse>>, ServiceError> {
    let intent = state.services.payments.create_intent(&user, request).await?;
    Ok(Json(ApiResponse::success(intent)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    summary = "Confirm payment",
    description = "Reads the intent from the processor and applies its outcome to the order",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Order after applying the intent's state", body = ApiResponse<ConfirmPaymentResponse>),
        (status = 400, description = "Intent does not belong to the order", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not the caller's order", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(request): AppJson<ConfirmPaymentRequest>,
) -> Result<Json<ApiResponse<ConfirmPaymentResponse>>, ServiceError> {
    let outcome = state.services.payments.confirm_payment(&user, request).await?;
    Ok(Json(ApiResponse::success(ConfirmPaymentResponse {
        order: outcome.order.into(),
        applied: outcome.applied,
        intent_status: outcome.intent_status,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/methods",
    summary = "List saved payment methods",
    responses(
        (status = 200, description = "Saved cards", body = ApiResponse<Vec<SavedPaymentMethod>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn list_payment_methods(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<SavedPaymentMethod>>>, ServiceError> {
    let methods = state.services.payments.list_payment_methods(&user).await?;
    Ok(Json(ApiResponse::success(methods)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/refund",
    summary = "Refund order",
    description = "Full refund by default; a smaller amount issues a partial refund",
    request_body = RefundOrderRequest,
    responses(
        (status = 200, description = "Refund issued", body = ApiResponse<RefundRecord>),
        (status = 400, description = "Order not refundable or amount invalid", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn refund_order(
    State(state): State<AppState>,
    AppJson(request): AppJson<RefundOrderRequest>,
) -> Result<Json<ApiResponse<RefundRecord>>, ServiceError> {
    let record = state.services.refunds.refund(request).await?;
    Ok(Json(ApiResponse::success(record)))
}
