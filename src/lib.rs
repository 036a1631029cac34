//! Pantry API Library
//!
//! Order and payment lifecycle for a grocery storefront: carts, checkout,
//! processor payment intents, signed webhooks, fulfillment and refunds.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod services;
pub mod tracing;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService, ADMIN_ROLE};
use crate::db::DbPool;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub auth: Arc<AuthService>,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    // Cart works for guests (x-guest-id) and signed-in users alike
    let cart = Router::new()
        .route("/cart", get(handlers::carts::view_cart))
        .route("/cart/guest-session", post(handlers::carts::create_guest_session))
        .route("/cart/items", post(handlers::carts::add_item))
        .route(
            "/cart/items/:product_id",
            put(handlers::carts::update_item).delete(handlers::carts::remove_item),
        )
        .route("/cart/transfer", post(handlers::carts::transfer_cart))
        .route("/cart/checkout", get(handlers::carts::checkout_preview))
        .with_optional_auth();

    let orders = Router::new()
        .route(
            "/orders",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route(
            "/orders/:id",
            get(handlers::orders::get_order).delete(handlers::orders::cancel_order),
        )
        .with_auth();

    let orders_admin = Router::new()
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .with_role(ADMIN_ROLE);

    let payments = Router::new()
        .route(
            "/payments/create-payment-intent",
            post(handlers::payments::create_payment_intent),
        )
        .route("/payments/confirm", post(handlers::payments::confirm_payment))
        .route("/payments/methods", get(handlers::payments::list_payment_methods))
        .with_auth();

    let payments_admin = Router::new()
        .route("/payments/refund", post(handlers::payments::refund_order))
        .with_role(ADMIN_ROLE);

    // Payment webhook (does not require auth, but signature-verified)
    let payment_webhook = Router::new().route(
        "/payments/webhook",
        post(handlers::payment_webhooks::payment_webhook),
    );

    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(cart)
        .merge(orders)
        .merge(orders_admin)
        .merge(payments)
        .merge(payments_admin)
        .merge(payment_webhook)
}

/// Full application: API routes, OpenAPI document and the middleware stack
pub fn app_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();
    let max_body_size = state.config.max_body_size;
    let auth = state.auth.clone();

    Router::new()
        .route("/api-docs/openapi.json", get(openapi_document))
        .nest("/api/v1", api_v1_routes())
        .layer(axum::middleware::from_fn_with_state(
            auth,
            auth::inject_auth_service,
        ))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

async fn openapi_document() -> impl IntoResponse {
    match openapi::openapi_json() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => errors::ServiceError::InternalError(format!("openapi rendering failed: {e}"))
            .into_response(),
    }
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "pantry-api",
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "health check: database unreachable");
            "unhealthy"
        }
    };

    let healthy = database == "healthy";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let health_data = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "checks": { "database": database },
        "timestamp": Utc::now().to_rfc3339(),
    });

    (status, Json(ApiResponse::success(health_data)))
}

pub mod prelude {
    pub use crate::db::DbPool;
    pub use crate::errors::ServiceError;
    pub use crate::events::{Event, EventSender};
    pub use crate::payments::PaymentProcessor;
    pub use crate::{app_router, ApiResponse, AppState};
}
