mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, Customer, TestApp};
use pantry_api::entities::product;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use uuid::Uuid;

fn items_order(customer: &Customer, lines: Value) -> Value {
    json!({
        "line_source": { "source": "items", "lines": lines },
        "address_id": customer.address.id,
        "payment_method_id": customer.payment_method.id,
    })
}

async fn post_order(app: &TestApp, customer: &Customer, body: Value) -> (StatusCode, Value) {
    app.send(Method::POST, "/api/v1/orders", Some(body), Some(&customer.token))
        .await
}

#[tokio::test]
async fn insufficient_stock_leaves_no_order_behind() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let bread = app.seed_product("Sourdough loaf", dec!(4.50), 2).await;

    let (status, body) = post_order(
        &app,
        &customer,
        items_order(&customer, json!([{ "product_id": bread.id, "quantity": 3 }])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "insufficient_stock");
    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.product(bread.id).await.stock_quantity, 2);
}

#[tokio::test]
async fn out_of_stock_products_are_refused() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let basil = app.seed_product("Basil", dec!(2.00), 0).await;

    let (status, body) = post_order(
        &app,
        &customer,
        items_order(&customer, json!([{ "product_id": basil.id, "quantity": 1 }])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "insufficient_stock");
}

#[tokio::test]
async fn unknown_products_are_not_found() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;

    let (status, body) = post_order(
        &app,
        &customer,
        items_order(&customer, json!([{ "product_id": Uuid::new_v4(), "quantity": 1 }])),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "product_not_found");
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn address_and_payment_method_must_belong_to_the_caller() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let stranger = app.seed_customer().await;
    let milk = app.seed_product("Whole milk 1L", dec!(1.25), 10).await;
    let lines = json!([{ "product_id": milk.id, "quantity": 1 }]);

    let mut body = items_order(&customer, lines.clone());
    body["address_id"] = json!(stranger.address.id);
    let (status, response) = post_order(&app, &customer, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "invalid_address");

    let mut body = items_order(&customer, lines);
    body["payment_method_id"] = json!(stranger.payment_method.id);
    let (status, response) = post_order(&app, &customer, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "invalid_payment_method");

    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn repeated_products_are_merged_into_one_line() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let yoghurt = app.seed_product("Greek yoghurt 500g", dec!(2.75), 10).await;

    let (status, body) = post_order(
        &app,
        &customer,
        items_order(
            &customer,
            json!([
                { "product_id": yoghurt.id, "quantity": 1 },
                { "product_id": yoghurt.id, "quantity": 2 }
            ]),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let lines = body["data"]["line_items"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["quantity"], 3);
    assert_eq!(decimal(&body["data"]["subtotal"]), dec!(8.25));
}

#[tokio::test]
async fn merged_quantity_is_checked_against_stock() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let cheese = app.seed_product("Cheddar 250g", dec!(3.75), 2).await;

    let (status, body) = post_order(
        &app,
        &customer,
        items_order(
            &customer,
            json!([
                { "product_id": cheese.id, "quantity": 2 },
                { "product_id": cheese.id, "quantity": 1 }
            ]),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "insufficient_stock");
}

#[tokio::test]
async fn order_lines_keep_the_price_paid() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let bread = app
        .seed_sale_product("Sourdough loaf", dec!(4.50), dec!(3.50), 5)
        .await;
    let order_id = app.place_order(&customer, &[(bread.id, 2)], "0").await;

    let mut changed: product::ActiveModel = bread.clone().into();
    changed.price = Set(dec!(6.00));
    changed.is_on_sale = Set(false);
    changed.discount_price = Set(None);
    changed.name = Set("Sourdough loaf (large)".to_string());
    changed.update(&*app.state.db).await.unwrap();

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/v1/orders/{order_id}"),
            None,
            Some(&customer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let line = &body["data"]["line_items"][0];
    assert_eq!(line["product_name"], "Sourdough loaf");
    assert_eq!(decimal(&line["unit_price"]), dec!(3.50));
    assert_eq!(decimal(&line["line_total"]), dec!(7.00));
    assert_eq!(decimal(&body["data"]["total"]), dec!(7.00));
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let milk = app.seed_product("Whole milk 1L", dec!(1.25), 10).await;

    let mut negative_tax = items_order(&customer, json!([{ "product_id": milk.id, "quantity": 1 }]));
    negative_tax["tax"] = json!("-1.00");

    let mut pickup_without_location =
        items_order(&customer, json!([{ "product_id": milk.id, "quantity": 1 }]));
    pickup_without_location["delivery"] = json!({ "is_pickup": true });

    let cases = [
        items_order(&customer, json!([])),
        items_order(&customer, json!([{ "product_id": milk.id, "quantity": 0 }])),
        items_order(&customer, json!([{ "product_id": milk.id, "quantity": 1000 }])),
        negative_tax,
        pickup_without_location,
        json!({ "line_source": { "source": "wishlist" } }),
    ];

    for body in cases {
        let (status, response) = post_order(&app, &customer, body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body} -> {response}");
        assert_eq!(response["code"], "validation_error", "{body}");
    }
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn pickup_orders_keep_their_location() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let milk = app.seed_product("Whole milk 1L", dec!(1.25), 10).await;

    let mut body = items_order(&customer, json!([{ "product_id": milk.id, "quantity": 2 }]));
    body["delivery"] = json!({
        "is_pickup": true,
        "pickup_location": "Store 12",
        "special_instructions": "Ring the bell",
    });
    let (status, response) = post_order(&app, &customer, body).await;
    assert_eq!(status, StatusCode::CREATED, "{response}");
    assert_eq!(response["data"]["is_pickup"], true);
    assert_eq!(response["data"]["pickup_location"], "Store 12");
    assert_eq!(response["data"]["special_instructions"], "Ring the bell");
}

#[tokio::test]
async fn ordering_from_an_empty_cart_fails() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;

    let body = json!({
        "line_source": { "source": "cart" },
        "address_id": customer.address.id,
        "payment_method_id": customer.payment_method.id,
    });
    let (status, response) = post_order(&app, &customer, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "empty_cart");
}

#[tokio::test]
async fn orders_require_a_signed_in_user() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let milk = app.seed_product("Whole milk 1L", dec!(1.25), 10).await;

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/orders",
            Some(items_order(&customer, json!([{ "product_id": milk.id, "quantity": 1 }]))),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/orders",
            Some(items_order(&customer, json!([{ "product_id": milk.id, "quantity": 1 }]))),
            Some("not-a-jwt"),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
