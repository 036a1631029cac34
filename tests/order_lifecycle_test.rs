mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, intent_event, TestApp};
use pantry_api::entities::order::{FulfillmentStatus, PaymentStatus};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn checkout_pay_and_fulfill() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let eggs = app.seed_product("Free-range eggs x12", dec!(3.00), 10).await;

    // Two at 3.00 plus 0.50 tax
    let body = json!({
        "line_source": { "source": "items", "lines": [{ "product_id": eggs.id, "quantity": 2 }] },
        "address_id": customer.address.id,
        "payment_method_id": customer.payment_method.id,
        "tax": "0.50",
    });
    let (status, created) = app
        .send(Method::POST, "/api/v1/orders", Some(body), Some(&customer.token))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let data = &created["data"];
    assert_eq!(decimal(&data["subtotal"]), dec!(6.00));
    assert_eq!(decimal(&data["total"]), dec!(6.50));
    assert_eq!(data["status"], "Pending");
    assert_eq!(data["payment_status"], "pending");
    assert_eq!(data["is_paid"], false);
    assert_eq!(data["line_items"][0]["product_name"], "Free-range eggs x12");
    assert_eq!(decimal(&data["line_items"][0]["unit_price"]), dec!(3.00));

    let order_id = uuid::Uuid::parse_str(data["id"].as_str().unwrap()).unwrap();

    // Creating the intent leaves the order alone
    let intent_id = app.start_payment(&customer, order_id).await;
    let order = app.order(order_id).await;
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.payment_intent_id, None);
    let requests = app.processor.intent_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount_minor, 650);
    assert_eq!(requests[0].currency, "usd");
    assert_eq!(app.processor.customers_created(), 1);

    let (status, _) = app
        .deliver_webhook(&intent_event(
            "payment_intent.succeeded",
            &intent_id,
            Some(order_id),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let paid = app.order(order_id).await;
    assert_eq!(paid.status, FulfillmentStatus::Processing);
    assert_eq!(paid.payment_status, PaymentStatus::Succeeded);
    assert!(paid.is_paid);
    assert!(paid.paid_at.is_some());
    assert_eq!(paid.payment_intent_id.as_deref(), Some(intent_id.as_str()));
    assert_eq!(app.product(eggs.id).await.stock_quantity, 8);

    // Redelivery changes nothing
    let (status, _) = app
        .deliver_webhook(&intent_event(
            "payment_intent.succeeded",
            &intent_id,
            Some(order_id),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let again = app.order(order_id).await;
    assert_eq!(again.version, paid.version);
    assert_eq!(again.paid_at, paid.paid_at);
    assert_eq!(app.product(eggs.id).await.stock_quantity, 8);

    let admin = app.admin_token();
    for next in ["Shipped", "Delivered"] {
        let (status, body) = app
            .send(
                Method::PUT,
                &format!("/api/v1/orders/{order_id}/status"),
                Some(json!({ "status": next })),
                Some(&admin),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["status"], next);
    }

    let (status, body) = app
        .send(
            Method::DELETE,
            &format!("/api/v1/orders/{order_id}"),
            None,
            Some(&customer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_state");
}

#[tokio::test]
async fn checkout_from_cart_clears_purchased_lines_once_paid() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let bread = app.seed_product("Sourdough loaf", dec!(4.50), 5).await;
    let basil = app.seed_product("Basil", dec!(2.00), 5).await;

    for (product, quantity, selected) in [(&bread, 2, true), (&basil, 1, false)] {
        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/cart/items",
                Some(json!({ "product_id": product.id, "quantity": quantity, "selected": selected })),
                Some(&customer.token),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let body = json!({
        "line_source": { "source": "cart" },
        "address_id": customer.address.id,
        "payment_method_id": customer.payment_method.id,
    });
    let (status, created) = app
        .send(Method::POST, "/api/v1/orders", Some(body), Some(&customer.token))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let order_id = uuid::Uuid::parse_str(created["data"]["id"].as_str().unwrap()).unwrap();
    let lines = created["data"]["line_items"].as_array().unwrap();
    assert_eq!(lines.len(), 1, "only selected lines are ordered");
    assert_eq!(decimal(&created["data"]["total"]), dec!(9.00));
    assert!(created["data"]["cart_id"].is_string());

    // The cart is untouched until payment succeeds
    let (_, cart) = app
        .send(Method::GET, "/api/v1/cart", None, Some(&customer.token))
        .await;
    assert_eq!(cart["data"]["lines"].as_array().unwrap().len(), 2);

    let intent_id = app.start_payment(&customer, order_id).await;
    app.deliver_webhook(&intent_event(
        "payment_intent.succeeded",
        &intent_id,
        Some(order_id),
        None,
    ))
    .await;

    let (_, cart) = app
        .send(Method::GET, "/api/v1/cart", None, Some(&customer.token))
        .await;
    let remaining = cart["data"]["lines"].as_array().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["product_id"], basil.id.to_string());
    assert_eq!(app.product(bread.id).await.stock_quantity, 3);
    assert_eq!(app.product(basil.id).await.stock_quantity, 5);
}

#[tokio::test]
async fn failed_payment_can_be_retried() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let milk = app.seed_product("Whole milk 1L", dec!(1.25), 10).await;
    let order_id = app.place_order(&customer, &[(milk.id, 4)], "0").await;

    let first = app.start_payment(&customer, order_id).await;
    app.deliver_webhook(&intent_event(
        "payment_intent.payment_failed",
        &first,
        Some(order_id),
        Some("Your card was declined."),
    ))
    .await;

    let failed = app.order(order_id).await;
    assert_eq!(failed.status, FulfillmentStatus::PaymentFailed);
    assert_eq!(failed.payment_status, PaymentStatus::Failed);
    assert_eq!(
        failed.payment_error_message.as_deref(),
        Some("Your card was declined.")
    );
    assert_eq!(app.product(milk.id).await.stock_quantity, 10);

    let second = app.start_payment(&customer, order_id).await;
    assert_ne!(first, second);
    app.deliver_webhook(&intent_event(
        "payment_intent.succeeded",
        &second,
        Some(order_id),
        None,
    ))
    .await;

    let paid = app.order(order_id).await;
    assert_eq!(paid.status, FulfillmentStatus::Processing);
    assert_eq!(paid.payment_status, PaymentStatus::Succeeded);
    assert_eq!(paid.payment_intent_id.as_deref(), Some(second.as_str()));
    assert_eq!(paid.payment_error_message, None);
    assert_eq!(app.product(milk.id).await.stock_quantity, 6);
    // Only one customer is created per user
    assert_eq!(app.processor.customers_created(), 1);
}

#[tokio::test]
async fn confirm_applies_the_intent_state_once() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let oil = app.seed_product("Olive oil 500ml", dec!(6.50), 3).await;
    let order_id = app.place_order(&customer, &[(oil.id, 1)], "0").await;
    let intent_id = app.start_payment(&customer, order_id).await;

    let confirm = json!({ "order_id": order_id, "payment_intent_id": intent_id });

    // Still waiting on the customer
    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/payments/confirm",
            Some(confirm.clone()),
            Some(&customer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["applied"], false);
    assert_eq!(body["data"]["order"]["payment_status"], "pending");

    app.processor.set_intent_status(&intent_id, "succeeded", None);
    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/payments/confirm",
            Some(confirm.clone()),
            Some(&customer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["applied"], true);
    assert_eq!(body["data"]["order"]["status"], "Processing");

    // The webhook for the same success arrives afterwards
    let (status, _) = app
        .deliver_webhook(&intent_event(
            "payment_intent.succeeded",
            &intent_id,
            Some(order_id),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.product(oil.id).await.stock_quantity, 2);

    let (_, body) = app
        .send(
            Method::POST,
            "/api/v1/payments/confirm",
            Some(confirm),
            Some(&customer.token),
        )
        .await;
    assert_eq!(body["data"]["applied"], false);
}

#[tokio::test]
async fn confirm_rejects_an_intent_from_another_order() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let pasta = app.seed_product("Spaghetti 500g", dec!(1.10), 20).await;
    let first = app.place_order(&customer, &[(pasta.id, 1)], "0").await;
    let second = app.place_order(&customer, &[(pasta.id, 2)], "0").await;
    let intent_for_first = app.start_payment(&customer, first).await;
    app.processor
        .set_intent_status(&intent_for_first, "succeeded", None);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/payments/confirm",
            Some(json!({ "order_id": second, "payment_intent_id": intent_for_first })),
            Some(&customer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert_eq!(app.order(second).await.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn paid_orders_cannot_start_another_payment() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let cheese = app.seed_product("Cheddar 250g", dec!(3.75), 4).await;
    let order_id = app.place_order(&customer, &[(cheese.id, 1)], "0").await;
    let intent_id = app.start_payment(&customer, order_id).await;
    app.deliver_webhook(&intent_event(
        "payment_intent.succeeded",
        &intent_id,
        Some(order_id),
        None,
    ))
    .await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/payments/create-payment-intent",
            Some(json!({ "order_id": order_id })),
            Some(&customer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_state");
}

#[tokio::test]
async fn saved_card_intents_carry_the_processor_method() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let bananas = app.seed_product("Bananas x6", dec!(1.50), 10).await;
    let order_id = app.place_order(&customer, &[(bananas.id, 1)], "0").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/payments/create-payment-intent",
            Some(json!({ "order_id": order_id, "payment_method_id": customer.payment_method.id })),
            Some(&customer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let requests = app.processor.intent_requests();
    assert_eq!(requests[0].payment_method_id.as_deref(), Some("pm_card_visa"));
    assert_eq!(requests[0].receipt_email.as_deref(), Some(customer.user.email.as_str()));

    // Methods are listed once a processor customer exists
    let (status, body) = app
        .send(Method::GET, "/api/v1/payments/methods", None, Some(&customer.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["last4"], "4242");
}

#[tokio::test]
async fn payment_methods_are_empty_without_a_processor_customer() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;

    let (status, body) = app
        .send(Method::GET, "/api/v1/payments/methods", None, Some(&customer.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}
