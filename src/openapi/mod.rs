use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pantry API",
        version = "1.0.0",
        description = r#"
# Pantry storefront API

Order and payment lifecycle for a grocery storefront.

## Flow

1. Build a cart (`/cart`), as a guest with an `x-guest-id` header or signed in.
2. Sign in and `POST /cart/transfer` to keep a guest cart.
3. `POST /orders` with `{"source": "cart"}` or explicit lines. The order starts `Pending` / `pending`.
4. `POST /payments/create-payment-intent` and confirm the payment client-side.
5. The processor's signed webhook moves the order. `POST /payments/confirm` applies the same outcome on demand.

## Authentication

Bearer JWTs issued by the storefront identity provider:

```
Authorization: Bearer <token>
```

Refunds and manual status changes need the `admin` role.

## Errors

Every failure uses one body:

```json
{
  "error": "Bad Request",
  "code": "insufficient_stock",
  "message": "Insufficient stock: Whole milk 1L (requested 3, available 1)",
  "request_id": "9b7c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "cart", description = "Guest and user carts"),
        (name = "orders", description = "Order creation and administration"),
        (name = "payments", description = "Payment intents, confirmation, refunds and processor webhooks"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::carts::create_guest_session,
        crate::handlers::carts::view_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::transfer_cart,
        crate::handlers::carts::checkout_preview,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::update_order_status,

        // Payments
        crate::handlers::payments::create_payment_intent,
        crate::handlers::payments::confirm_payment,
        crate::handlers::payments::list_payment_methods,
        crate::handlers::payments::refund_order,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            crate::entities::order::FulfillmentStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::order::OrderLine,
            crate::services::order_builder::CreateOrderRequest,
            crate::services::order_builder::LineSource,
            crate::services::order_builder::RequestedLine,
            crate::services::order_builder::DeliveryOptions,
            crate::services::refunds::RefundReason,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

/// Registers the bearer scheme referenced by `security(("Bearer" = []))`
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// Pretty-printed document, as served at `/api-docs/openapi.json`
pub fn openapi_json() -> Result<String, serde_json::Error> {
    ApiDocV1::openapi().to_pretty_json()
}
