#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use pantry_api::{
    app_router,
    auth::{AuthConfig, AuthService, ADMIN_ROLE, GUEST_ID_HEADER},
    config::AppConfig,
    db,
    entities::{address, order, payment_method, product, user},
    events::{self, EventSender},
    handlers::AppServices,
    payments::{
        compute_signature, CardDetails, CustomerRequest, PaymentError, PaymentIntent,
        PaymentIntentRequest, PaymentProcessor, ProcessorCustomer, ProcessorError,
        ProcessorPaymentMethod, ProcessorRefund, RefundRequest, ORDER_ID_METADATA_KEY,
        SIGNATURE_HEADER,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration_test_secret_key_with_plenty_of_entropy";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// In-process stand-in for the payment processor. Intents live in memory
/// and tests move them between states with [`FakeProcessor::set_intent_status`].
#[derive(Default)]
pub struct FakeProcessor {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    next_id: u32,
    customers: Vec<CustomerRequest>,
    intents: HashMap<String, PaymentIntent>,
    intent_requests: Vec<PaymentIntentRequest>,
    refunds: Vec<RefundRequest>,
}

impl FakeState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }
}

impl FakeProcessor {
    pub fn set_intent_status(&self, intent_id: &str, status: &str, error: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let intent = state
            .intents
            .get_mut(intent_id)
            .expect("intent created through the fake");
        intent.status = status.to_string();
        intent.last_payment_error = error.map(|message| PaymentError {
            message: Some(message.to_string()),
            code: Some("card_declined".to_string()),
        });
    }

    pub fn customers_created(&self) -> usize {
        self.state.lock().unwrap().customers.len()
    }

    pub fn intent_requests(&self) -> Vec<PaymentIntentRequest> {
        self.state.lock().unwrap().intent_requests.clone()
    }

    pub fn refund_requests(&self) -> Vec<RefundRequest> {
        self.state.lock().unwrap().refunds.clone()
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_customer(
        &self,
        request: CustomerRequest,
    ) -> Result<ProcessorCustomer, ProcessorError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next("cus");
        state.customers.push(request);
        Ok(ProcessorCustomer { id })
    }

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ProcessorError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next("pi");
        let intent = PaymentIntent {
            client_secret: Some(format!("{id}_secret")),
            status: if request.payment_method_id.is_some() {
                "processing".to_string()
            } else {
                "requires_payment_method".to_string()
            },
            amount: request.amount_minor,
            metadata: HashMap::from([(
                ORDER_ID_METADATA_KEY.to_string(),
                request.order_id.to_string(),
            )]),
            last_payment_error: None,
            latest_charge: None,
            id: id.clone(),
        };
        state.intents.insert(id, intent.clone());
        state.intent_requests.push(request);
        Ok(intent)
    }

    async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.state
            .lock()
            .unwrap()
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| ProcessorError::Api {
                status: 404,
                code: Some("resource_missing".to_string()),
                message: format!("No such payment_intent: '{intent_id}'"),
            })
    }

    async fn create_refund(
        &self,
        request: RefundRequest,
    ) -> Result<ProcessorRefund, ProcessorError> {
        let mut state = self.state.lock().unwrap();
        let captured = state
            .intents
            .get(&request.payment_intent_id)
            .map(|pi| pi.amount)
            .unwrap_or_default();
        let id = state.next("re");
        let refund = ProcessorRefund {
            id,
            amount: request.amount_minor.unwrap_or(captured),
            status: Some("succeeded".to_string()),
            payment_intent: Some(request.payment_intent_id.clone()),
        };
        state.refunds.push(request);
        Ok(refund)
    }

    async fn list_payment_methods(
        &self,
        _customer_id: &str,
    ) -> Result<Vec<ProcessorPaymentMethod>, ProcessorError> {
        Ok(vec![ProcessorPaymentMethod {
            id: "pm_card_visa".to_string(),
            card: Some(CardDetails {
                brand: "visa".to_string(),
                last4: "4242".to_string(),
                exp_month: 12,
                exp_year: 2030,
            }),
        }])
    }
}

/// A user with an address, a saved card and a bearer token
pub struct Customer {
    pub user: user::Model,
    pub address: address::Model,
    pub payment_method: payment_method::Model,
    pub token: String,
}

impl Customer {
    pub fn id(&self) -> Uuid {
        self.user.id
    }
}

/// Application wired over a throwaway SQLite file and the fake processor
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub processor: Arc<FakeProcessor>,
    auth: Arc<AuthService>,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("pantry.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("connect sqlite");
        db::run_migrations(&pool).await.expect("run migrations");
        let db = Arc::new(pool);

        let (tx, rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(rx));
        let event_sender = Arc::new(EventSender::new(tx));

        let auth = Arc::new(AuthService::new(
            AuthConfig::from_app_config(&cfg).expect("auth config"),
        ));
        let processor = Arc::new(FakeProcessor::default());
        let services = AppServices::new(db.clone(), &cfg, processor.clone(), Some(event_sender));

        let state = AppState {
            db,
            config: cfg,
            auth: auth.clone(),
            services,
        };

        Self {
            router: app_router(state.clone()),
            state,
            processor,
            auth,
            _dir: dir,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        self.auth
            .issue_token(
                user_id,
                None,
                roles.iter().map(|r| r.to_string()).collect(),
            )
            .expect("issue token")
    }

    pub fn admin_token(&self) -> String {
        self.token_for(Uuid::new_v4(), &[ADMIN_ROLE])
    }

    pub async fn seed_user(&self, email: &str) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            first_name: Set("Test".to_string()),
            last_name: Set("Shopper".to_string()),
            phone: Set(None),
            processor_customer_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_customer(&self) -> Customer {
        let user = self
            .seed_user(&format!("{}@pantry.test", Uuid::new_v4().simple()))
            .await;
        let now = Utc::now();
        let address = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            street: Set("12 Market Street".to_string()),
            city: Set("Springfield".to_string()),
            postal_code: Set("12345".to_string()),
            country: Set("US".to_string()),
            created_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address");
        let payment_method = payment_method::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            processor_payment_method_id: Set("pm_card_visa".to_string()),
            brand: Set(Some("visa".to_string())),
            last4: Set(Some("4242".to_string())),
            is_default: Set(true),
            created_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed payment method");

        let token = self.token_for(user.id, &[]);
        Customer {
            user,
            address,
            payment_method,
            token,
        }
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.insert_product(name, price, None, stock).await
    }

    pub async fn seed_sale_product(
        &self,
        name: &str,
        price: Decimal,
        sale_price: Decimal,
        stock: i32,
    ) -> product::Model {
        self.insert_product(name, price, Some(sale_price), stock).await
    }

    async fn insert_product(
        &self,
        name: &str,
        price: Decimal,
        sale_price: Option<Decimal>,
        stock: i32,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            discount_price: Set(sale_price),
            is_on_sale: Set(sale_price.is_some()),
            stock_quantity: Set(stock),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        product::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load product")
            .expect("product exists")
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    /// Places an order for explicit lines and returns its id
    pub async fn place_order(&self, customer: &Customer, lines: &[(Uuid, i32)], tax: &str) -> Uuid {
        let lines: Vec<Value> = lines
            .iter()
            .map(|(product_id, quantity)| json!({ "product_id": product_id, "quantity": quantity }))
            .collect();
        let body = json!({
            "line_source": { "source": "items", "lines": lines },
            "address_id": customer.address.id,
            "payment_method_id": customer.payment_method.id,
            "tax": tax,
        });
        let (status, json) = self
            .send(Method::POST, "/api/v1/orders", Some(body), Some(&customer.token))
            .await;
        assert_eq!(status, StatusCode::CREATED, "order creation failed: {json}");
        Uuid::parse_str(json["data"]["id"].as_str().expect("order id")).expect("uuid")
    }

    /// Creates a payment intent for the order and returns the intent id
    pub async fn start_payment(&self, customer: &Customer, order_id: Uuid) -> String {
        let (status, json) = self
            .send(
                Method::POST,
                "/api/v1/payments/create-payment-intent",
                Some(json!({ "order_id": order_id })),
                Some(&customer.token),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "intent creation failed: {json}");
        json["data"]["payment_intent_id"]
            .as_str()
            .expect("intent id")
            .to_string()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize body"))
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error")
    }

    /// JSON request with an optional bearer token; returns status and body
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let auth = token.map(|t| format!("Bearer {t}"));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|value| vec![("authorization", value)])
            .unwrap_or_default();
        read_json(self.request(method, uri, body, &headers).await).await
    }

    pub async fn send_as_guest(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        guest_id: &str,
    ) -> (StatusCode, Value) {
        read_json(
            self.request(method, uri, body, &[(GUEST_ID_HEADER, guest_id)])
                .await,
        )
        .await
    }

    /// Posts a correctly signed processor event
    pub async fn deliver_webhook(&self, event: &Value) -> (StatusCode, Value) {
        let payload = serde_json::to_vec(event).expect("serialize event");
        let timestamp = Utc::now().timestamp();
        let signature =
            compute_signature(WEBHOOK_SECRET, timestamp, &payload).expect("sign payload");
        self.deliver_raw_webhook(payload, Some(format!("t={timestamp},v1={signature}")))
            .await
    }

    pub async fn deliver_raw_webhook(
        &self,
        payload: Vec<u8>,
        signature: Option<String>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        let response = self
            .router
            .clone()
            .oneshot(builder.body(Body::from(payload)).expect("build request"))
            .await
            .expect("router error");
        read_json(response).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Decimal fields are serialized as strings
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        other => Decimal::from_str(&other.to_string()).expect("decimal number"),
    }
}

pub fn intent_event(
    event_type: &str,
    payment_intent_id: &str,
    order_id: Option<Uuid>,
    failure_message: Option<&str>,
) -> Value {
    let metadata = match order_id {
        Some(id) => json!({ ORDER_ID_METADATA_KEY: id.to_string() }),
        None => json!({}),
    };
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": {
            "object": {
                "id": payment_intent_id,
                "object": "payment_intent",
                "metadata": metadata,
                "last_payment_error": failure_message.map(|m| json!({ "message": m, "code": "card_declined" })),
            }
        }
    })
}

pub fn charge_refunded_event(
    payment_intent_id: &str,
    order_id: Option<Uuid>,
    refund_id: &str,
    amount_minor: i64,
) -> Value {
    let metadata = match order_id {
        Some(id) => json!({ ORDER_ID_METADATA_KEY: id.to_string() }),
        None => json!({}),
    };
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "charge.refunded",
        "data": {
            "object": {
                "id": format!("ch_{}", Uuid::new_v4().simple()),
                "object": "charge",
                "amount_refunded": amount_minor,
                "payment_intent": payment_intent_id,
                "metadata": metadata,
                "refunds": { "data": [{ "id": refund_id, "amount": amount_minor }] },
            }
        }
    })
}
