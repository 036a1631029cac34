use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::auth::identity::CallerIdentity;
use crate::db::DbPool;
use crate::entities::order::{self, FulfillmentStatus, OrderLine, OrderLines, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::accounts::AccountService;
use crate::services::carts::{CartService, MAX_LINE_QUANTITY};
use crate::services::catalog::{CatalogStore, ProductSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RequestedLine {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999, message = "Quantity must be between 1 and 999"))]
    pub quantity: i32,
}

/// Where the order's lines come from
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum LineSource {
    /// Selected lines of the caller's cart
    Cart,
    /// Explicit list of products
    Items { lines: Vec<RequestedLine> },
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_delivery", skip_on_field_errors = false))]
pub struct DeliveryOptions {
    pub delivery_date: Option<NaiveDate>,
    #[validate(length(max = 64, message = "Delivery time slot is too long"))]
    pub delivery_time_slot: Option<String>,
    #[serde(default)]
    pub is_pickup: bool,
    #[validate(length(max = 255, message = "Pickup location is too long"))]
    pub pickup_location: Option<String>,
    #[validate(length(max = 1000, message = "Special instructions are too long"))]
    pub special_instructions: Option<String>,
}

fn validate_delivery(options: &DeliveryOptions) -> Result<(), ValidationError> {
    let has_location = options
        .pickup_location
        .as_deref()
        .map_or(false, |l| !l.trim().is_empty());
    if options.is_pickup && !has_location {
        return Err(ValidationError::new("pickup_location_required"));
    }
    Ok(())
}

fn validate_tax(tax: &Decimal) -> Result<(), ValidationError> {
    if tax.is_sign_negative() && !tax.is_zero() {
        return Err(ValidationError::new("negative_tax"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub line_source: LineSource,
    pub address_id: Uuid,
    pub payment_method_id: Uuid,
    /// Computed by the caller's tax provider
    #[serde(default)]
    #[validate(custom = "validate_tax")]
    #[schema(value_type = String, example = "0.50")]
    pub tax: Decimal,
    #[serde(default)]
    #[validate]
    pub delivery: DeliveryOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Sums quantities of repeated products, keeping first-seen order
pub fn merge_duplicate_lines(lines: Vec<RequestedLine>) -> Vec<RequestedLine> {
    let mut merged: Vec<RequestedLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(line),
        }
    }
    merged
}

/// Freezes name and effective price into order lines
pub fn price_lines(items: &[(ProductSnapshot, i32)]) -> Vec<OrderLine> {
    items
        .iter()
        .map(|(product, quantity)| {
            let unit_price = product.effective_price();
            OrderLine {
                product_id: product.id,
                product_name: product.name.clone(),
                quantity: *quantity,
                unit_price,
                line_total: unit_price * Decimal::from(*quantity),
            }
        })
        .collect()
}

pub fn compute_totals(lines: &[OrderLine], tax: Decimal) -> Totals {
    let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
    Totals {
        subtotal,
        tax,
        total: subtotal + tax,
    }
}

/// Refuses quantities above what is on hand
pub fn check_stock(product: &ProductSnapshot, quantity: i32) -> Result<(), ServiceError> {
    if !product.in_stock() || product.stock_quantity < quantity {
        return Err(ServiceError::InsufficientStock(format!(
            "{} (requested {}, available {})",
            product.name,
            quantity,
            product.stock_quantity.max(0)
        )));
    }
    Ok(())
}

/// Validates a checkout and persists it as a pending order
#[derive(Clone)]
pub struct OrderBuilder {
    db_pool: Arc<DbPool>,
    catalog: Arc<dyn CatalogStore>,
    carts: CartService,
    accounts: AccountService,
    currency: String,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderBuilder {
    pub fn new(
        db_pool: Arc<DbPool>,
        catalog: Arc<dyn CatalogStore>,
        carts: CartService,
        accounts: AccountService,
        currency: String,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            catalog,
            carts,
            accounts,
            currency,
            event_sender,
        }
    }

    /// Every check runs before the single insert, so a failed checkout
    /// leaves nothing behind.
    #[instrument(skip(self, request), fields(owner = %identity))]
    pub async fn build_order(
        &self,
        identity: &CallerIdentity,
        request: CreateOrderRequest,
    ) -> Result<order::Model, ServiceError> {
        let user_id = identity.user_id().ok_or_else(|| {
            ServiceError::Unauthorized("Sign in to place an order".to_string())
        })?;
        request.validate()?;

        let (cart_id, items) = self.resolve_items(identity, &request.line_source).await?;

        for (product, quantity) in &items {
            check_stock(product, *quantity)?;
        }

        let lines = price_lines(&items);

        self.accounts
            .owned_address(user_id, request.address_id)
            .await?;
        self.accounts
            .owned_payment_method(user_id, request.payment_method_id)
            .await?;

        let totals = compute_totals(&lines, request.tax);
        if totals.total <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Order total must be greater than zero".to_string(),
            ));
        }

        let now = Utc::now();
        let delivery = request.delivery;
        let new_order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            cart_id: Set(cart_id),
            line_items: Set(OrderLines(lines)),
            subtotal: Set(totals.subtotal),
            tax: Set(totals.tax),
            total: Set(totals.total),
            currency: Set(self.currency.clone()),
            status: Set(FulfillmentStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            payment_intent_id: Set(None),
            is_paid: Set(false),
            paid_at: Set(None),
            payment_error_message: Set(None),
            refund_id: Set(None),
            refund_amount: Set(None),
            refunded_at: Set(None),
            address_id: Set(request.address_id),
            payment_method_id: Set(request.payment_method_id),
            delivery_date: Set(delivery.delivery_date),
            delivery_time_slot: Set(delivery.delivery_time_slot),
            is_pickup: Set(delivery.is_pickup),
            pickup_location: Set(delivery.pickup_location.filter(|_| delivery.is_pickup)),
            special_instructions: Set(delivery.special_instructions),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        let order = new_order.insert(&*self.db_pool).await?;

        info!(order_id = %order.id, total = %order.total, lines = order.line_items.len(), "order created");
        counter!("pantry.orders.created", 1);
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderCreated {
                    order_id: order.id,
                    user_id,
                    total: order.total,
                })
                .await;
        }

        Ok(order)
    }

    async fn resolve_items(
        &self,
        identity: &CallerIdentity,
        source: &LineSource,
    ) -> Result<(Option<Uuid>, Vec<(ProductSnapshot, i32)>), ServiceError> {
        match source {
            LineSource::Cart => {
                let cart = self.carts.resolve_checkout_items(identity).await?;
                let items = cart
                    .items
                    .into_iter()
                    .map(|item| (item.product, item.quantity))
                    .collect();
                Ok((Some(cart.cart_id), items))
            }
            LineSource::Items { lines } => {
                if lines.is_empty() {
                    return Err(ServiceError::ValidationError(
                        "Order must contain at least one line".to_string(),
                    ));
                }
                for line in lines {
                    line.validate()?;
                }
                let merged = merge_duplicate_lines(lines.clone());

                let mut items = Vec::with_capacity(merged.len());
                for line in merged {
                    if line.quantity > MAX_LINE_QUANTITY {
                        return Err(ServiceError::ValidationError(format!(
                            "Quantity for product {} cannot exceed {MAX_LINE_QUANTITY}",
                            line.product_id
                        )));
                    }
                    let product = self
                        .catalog
                        .get_product(line.product_id)
                        .await?
                        .ok_or(ServiceError::ProductNotFound(line.product_id))?;
                    items.push((product, line.quantity));
                }
                Ok((None, items))
            }
        }
    }
}
