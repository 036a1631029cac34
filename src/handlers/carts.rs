use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::AppJson;
use crate::auth::{AuthUser, CallerIdentity};
use crate::entities::order::OrderLine;
use crate::errors::ServiceError;
use crate::services::carts::{AddCartItemRequest, CartView, GuestSession, UpdateCartItemRequest};
use crate::services::order_builder::{check_stock, compute_totals, price_lines};
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct TransferCartRequest {
    pub guest_id: String,
}

/// What ordering from the cart right now would contain
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutPreview {
    pub cart_id: Uuid,
    pub lines: Vec<OrderLine>,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    /// Products that cannot cover the requested quantity
    pub unavailable: Vec<Uuid>,
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/guest-session",
    summary = "Start guest session",
    description = "Mints a guest id to send as x-guest-id on later cart calls",
    responses((status = 201, description = "Guest session created", body = ApiResponse<GuestSession>)),
    tag = "cart"
)]
pub async fn create_guest_session(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state.services.carts.create_guest_session().await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "View cart",
    params(("x-guest-id" = Option<String>, Header, description = "Guest session id when not signed in")),
    responses(
        (status = 200, description = "Current cart", body = ApiResponse<CartView>),
        (status = 401, description = "Neither a token nor a guest id was sent", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn view_cart(
    State(state): State<AppState>,
    identity: CallerIdentity,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state.services.carts.view_cart(&identity).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add item",
    description = "Adding a product already in the cart increases its quantity",
    params(("x-guest-id" = Option<String>, Header, description = "Guest session id when not signed in")),
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    identity: CallerIdentity,
    AppJson(request): AppJson<AddCartItemRequest>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state.services.carts.add_item(&identity, request).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{product_id}",
    summary = "Update item",
    params(
        ("product_id" = Uuid, Path, description = "Product in the cart"),
        ("x-guest-id" = Option<String>, Header, description = "Guest session id when not signed in"),
    ),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Product not in cart", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    identity: CallerIdentity,
    Path(product_id): Path<Uuid>,
    AppJson(request): AppJson<UpdateCartItemRequest>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state
        .services
        .carts
        .update_item(&identity, product_id, request)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    summary = "Remove item",
    params(
        ("product_id" = Uuid, Path, description = "Product in the cart"),
        ("x-guest-id" = Option<String>, Header, description = "Guest session id when not signed in"),
    ),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Product not in cart", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    identity: CallerIdentity,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state.services.carts.remove_item(&identity, product_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/transfer",
    summary = "Transfer guest cart",
    description = "Merges a guest cart into the signed-in user's cart",
    request_body = TransferCartRequest,
    responses(
        (status = 200, description = "Merged user cart", body = ApiResponse<CartView>),
        (status = 401, description = "Sign-in required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn transfer_cart(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(request): AppJson<TransferCartRequest>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state
        .services
        .carts
        .transfer_guest_cart(&request.guest_id, user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    get,
    path = "/api/v1/cart/checkout",
    summary = "Preview checkout",
    description = "Selected lines priced against the current catalog",
    params(("x-guest-id" = Option<String>, Header, description = "Guest session id when not signed in")),
    responses(
        (status = 200, description = "Checkout preview", body = ApiResponse<CheckoutPreview>),
        (status = 400, description = "Nothing selected", body = crate::errors::ErrorResponse),
        (status = 404, description = "A selected product no longer exists", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn checkout_preview(
    State(state): State<AppState>,
    identity: CallerIdentity,
) -> Result<Json<ApiResponse<CheckoutPreview>>, ServiceError> {
    let cart = state.services.carts.resolve_checkout_items(&identity).await?;
    let items: Vec<_> = cart
        .items
        .into_iter()
        .map(|item| (item.product, item.quantity))
        .collect();

    let unavailable = items
        .iter()
        .filter(|(product, quantity)| check_stock(product, *quantity).is_err())
        .map(|(product, _)| product.id)
        .collect();
    let lines = price_lines(&items);
    let totals = compute_totals(&lines, Decimal::ZERO);

    Ok(Json(ApiResponse::success(CheckoutPreview {
        cart_id: cart.cart_id,
        lines,
        subtotal: totals.subtotal,
        unavailable,
    })))
}
