use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned for every failed request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "code": "insufficient_stock",
    "message": "Insufficient stock: Whole milk 1L (requested 3, available 1)",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Machine-readable error kind
    #[schema(example = "insufficient_stock")]
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Cart has no selected items")]
    EmptyCart,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    #[error("No payment found for order {0}")]
    NoPaymentFound(Uuid),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) | Self::ProductNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidState(_)
            | Self::ValidationError(_)
            | Self::InsufficientStock(_)
            | Self::EmptyCart
            | Self::InvalidAddress(_)
            | Self::InvalidPaymentMethod(_)
            | Self::NoPaymentFound(_)
            | Self::SignatureVerification(_) => StatusCode::BAD_REQUEST,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable error kind carried in the `code` field
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ProductNotFound(_) => "product_not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::ValidationError(_) => "validation_error",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::EmptyCart => "empty_cart",
            Self::InvalidAddress(_) => "invalid_address",
            Self::InvalidPaymentMethod(_) => "invalid_payment_method",
            Self::NoPaymentFound(_) => "no_payment_found",
            Self::ExternalServiceError(_) => "external_service_error",
            Self::SignatureVerification(_) => "signature_verification_failed",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::SignatureVerification(_) => "Webhook signature verification failed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.error_code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
