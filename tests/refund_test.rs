mod common;

use axum::http::{Method, StatusCode};
use common::{charge_refunded_event, decimal, intent_event, TestApp};
use pantry_api::entities::order::{FulfillmentStatus, PaymentStatus};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

/// A customer order for 6.50 that the processor has captured
async fn paid_order(app: &TestApp) -> (Uuid, String) {
    let customer = app.seed_customer().await;
    let eggs = app.seed_product("Free-range eggs x12", dec!(3.00), 10).await;
    let order_id = app.place_order(&customer, &[(eggs.id, 2)], "0.50").await;
    let intent_id = app.start_payment(&customer, order_id).await;
    let (status, _) = app
        .deliver_webhook(&intent_event(
            "payment_intent.succeeded",
            &intent_id,
            Some(order_id),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    (order_id, intent_id)
}

async fn refund(app: &TestApp, body: Value) -> (StatusCode, Value) {
    app.send(
        Method::POST,
        "/api/v1/payments/refund",
        Some(body),
        Some(&app.admin_token()),
    )
    .await
}

#[tokio::test]
async fn full_refund_by_default() {
    let app = TestApp::new().await;
    let (order_id, intent_id) = paid_order(&app).await;

    let (status, body) = refund(&app, json!({ "order_id": order_id })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["data"]["amount"]), dec!(6.50));
    assert_eq!(body["data"]["reason"], "requested_by_customer");
    let refund_id = body["data"]["refund_id"].as_str().unwrap().to_string();

    let requests = app.processor.refund_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payment_intent_id, intent_id);
    assert_eq!(requests[0].amount_minor, None);
    assert_eq!(requests[0].reason, "requested_by_customer");

    let order = app.order(order_id).await;
    assert_eq!(order.status, FulfillmentStatus::Refunded);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(order.refund_id.as_deref(), Some(refund_id.as_str()));
    assert_eq!(order.refund_amount, Some(dec!(6.50)));
    assert!(order.refunded_at.is_some());

    // The processor's own notification about the same refund is a no-op
    let version = order.version;
    let (status, _) = app
        .deliver_webhook(&charge_refunded_event(&intent_id, Some(order_id), &refund_id, 650))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.order(order_id).await.version, version);
}

#[tokio::test]
async fn partial_refund_sends_the_amount() {
    let app = TestApp::new().await;
    let (order_id, _) = paid_order(&app).await;

    let (status, body) = refund(
        &app,
        json!({ "order_id": order_id, "amount": "2.00", "reason": "duplicate" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["data"]["amount"]), dec!(2.00));

    let requests = app.processor.refund_requests();
    assert_eq!(requests[0].amount_minor, Some(200));
    assert_eq!(requests[0].reason, "duplicate");

    let order = app.order(order_id).await;
    assert_eq!(order.refund_amount, Some(dec!(2.00)));
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn an_order_is_refunded_at_most_once() {
    let app = TestApp::new().await;
    let (order_id, _) = paid_order(&app).await;

    let (status, _) = refund(&app, json!({ "order_id": order_id, "amount": "1.00" })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = refund(&app, json!({ "order_id": order_id })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_state");
    assert_eq!(app.processor.refund_requests().len(), 1);
}

#[tokio::test]
async fn refund_amount_must_fit_the_order() {
    let app = TestApp::new().await;
    let (order_id, _) = paid_order(&app).await;

    for amount in ["0", "-1.00", "6.51", "0.004", "1.255"] {
        let (status, body) = refund(&app, json!({ "order_id": order_id, "amount": amount })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{amount}");
        assert_eq!(body["code"], "validation_error", "{amount}");
    }
    assert!(app.processor.refund_requests().is_empty());
    assert_eq!(app.order(order_id).await.payment_status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn unpaid_orders_cannot_be_refunded() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let milk = app.seed_product("Whole milk 1L", dec!(1.25), 10).await;
    let order_id = app.place_order(&customer, &[(milk.id, 1)], "0").await;

    let (status, body) = refund(&app, json!({ "order_id": order_id })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "no_payment_found");

    // An intent is known but the payment failed
    app.deliver_webhook(&intent_event(
        "payment_intent.payment_failed",
        "pi_declined",
        Some(order_id),
        Some("Your card was declined."),
    ))
    .await;
    let (status, body) = refund(&app, json!({ "order_id": order_id })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_state");

    let (status, _) = refund(&app, json!({ "order_id": Uuid::new_v4() })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refunds_are_admin_only() {
    let app = TestApp::new().await;
    let (order_id, _) = paid_order(&app).await;
    let customer = app.seed_customer().await;

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/payments/refund",
            Some(json!({ "order_id": order_id })),
            Some(&customer.token),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/payments/refund",
            Some(json!({ "order_id": order_id })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.processor.refund_requests().is_empty());
}

#[tokio::test]
async fn refunded_orders_cannot_be_cancelled() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let milk = app.seed_product("Whole milk 1L", dec!(1.25), 10).await;
    let order_id = app.place_order(&customer, &[(milk.id, 2)], "0").await;
    let intent_id = app.start_payment(&customer, order_id).await;
    app.deliver_webhook(&intent_event(
        "payment_intent.succeeded",
        &intent_id,
        Some(order_id),
        None,
    ))
    .await;
    let (status, _) = refund(&app, json!({ "order_id": order_id })).await;
    assert_eq!(status, StatusCode::OK);

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
