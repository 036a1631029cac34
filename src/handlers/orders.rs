use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{AppJson, PaginatedResponse, PaginationParams};
use crate::auth::{AuthUser, CallerIdentity};
use crate::entities::order::{self, FulfillmentStatus, OrderLine, PaymentStatus};
use crate::errors::ServiceError;
use crate::services::order_builder::CreateOrderRequest;
use crate::{ApiResponse, AppState};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_id: Option<Uuid>,
    pub line_items: Vec<OrderLine>,
    #[schema(value_type = String, example = "6.00")]
    pub subtotal: Decimal,
    #[schema(value_type = String, example = "0.50")]
    pub tax: Decimal,
    #[schema(value_type = String, example = "6.50")]
    pub total: Decimal,
    pub currency: String,
    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_error_message: Option<String>,
    pub refund_id: Option<String>,
    #[schema(value_type = Option<String>)]
    pub refund_amount: Option<Decimal>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub address_id: Uuid,
    pub payment_method_id: Uuid,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_time_slot: Option<String>,
    pub is_pickup: bool,
    pub pickup_location: Option<String>,
    pub special_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<order::Model> for OrderResponse {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            cart_id: order.cart_id,
            line_items: order.line_items.0,
            subtotal: order.subtotal,
            tax: order.tax,
            total: order.total,
            currency: order.currency,
            status: order.status,
            payment_status: order.payment_status,
            payment_intent_id: order.payment_intent_id,
            is_paid: order.is_paid,
            paid_at: order.paid_at,
            payment_error_message: order.payment_error_message,
            refund_id: order.refund_id,
            refund_amount: order.refund_amount,
            refunded_at: order.refunded_at,
            address_id: order.address_id,
            payment_method_id: order.payment_method_id,
            delivery_date: order.delivery_date,
            delivery_time_slot: order.delivery_time_slot,
            is_pickup: order.is_pickup,
            pickup_location: order.pickup_location,
            special_instructions: order.special_instructions,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrderStatusRequest {
    #[schema(example = "Shipped")]
    pub status: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Validate stock, prices, address and payment method, then persist a pending order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Validation, stock, address or payment method failure", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(request): AppJson<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .order_builder
        .build_order(&CallerIdentity::User(user.user_id), request)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderResponse::from(order))),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "The caller's orders, newest first",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let (page, per_page) = params.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let (orders, total) = state
        .services
        .orders
        .list_orders_for_user(user.user_id, page, per_page)
        .await?;
    let items = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, page, per_page, total,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Not the caller's order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order_for(id, &user).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    summary = "Cancel order",
    description = "Cancels the order unless it has shipped, been delivered or been refunded",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not the caller's order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.cancel_order(id, &user).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Update fulfillment status",
    description = "Administrative status change. Payment-driven statuses cannot be set by hand.",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Unknown status or transition not allowed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(request): AppJson<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let status = parse_status(&request.status)?;
    let order = state.services.orders.update_status(id, status).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

fn parse_status(raw: &str) -> Result<FulfillmentStatus, ServiceError> {
    FulfillmentStatus::from_str(raw.trim()).map_err(|_| {
        ServiceError::ValidationError(format!("Unknown order status: {raw}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::order_state::tests::sample_order;
    use assert_matches::assert_matches;

    #[test]
    fn status_strings_are_closed() {
        assert_eq!(parse_status("Shipped").unwrap(), FulfillmentStatus::Shipped);
        assert_eq!(
            parse_status(" PaymentFailed ").unwrap(),
            FulfillmentStatus::PaymentFailed
        );
        assert_matches!(parse_status("Lost"), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn response_carries_the_snapshot() {
        let order = sample_order(FulfillmentStatus::Pending, PaymentStatus::Pending);
        let response = OrderResponse::from(order.clone());
        assert_eq!(response.line_items, order.line_items.0);
        assert_eq!(response.total, order.total);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["payment_status"], "pending");
        assert_eq!(json["status"], "Pending");
        assert!(json.get("cart_id").is_none());
    }
}
