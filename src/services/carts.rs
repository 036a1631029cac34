use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::identity::CallerIdentity;
use crate::db::{is_unique_violation, DbPool};
use crate::entities::{cart, cart_line};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::catalog::{CatalogStore, ProductSnapshot};

const GUEST_ID_LEN: usize = 32;
pub const MAX_LINE_QUANTITY: i32 = 999;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999, message = "Quantity must be between 1 and 999"))]
    pub quantity: i32,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, max = 999, message = "Quantity must be between 1 and 999"))]
    pub quantity: Option<i32>,
    pub selected: Option<bool>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GuestSession {
    pub guest_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub selected: bool,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
    pub in_stock: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub cart_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub lines: Vec<CartLineView>,
    /// Sum over selected lines only
    #[schema(value_type = String)]
    pub selected_subtotal: Decimal,
    pub selected_count: usize,
}

/// A selected cart line resolved against the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutItem {
    pub product: ProductSnapshot,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutCart {
    pub cart_id: Uuid,
    pub items: Vec<CheckoutItem>,
}

/// Cart aggregate operations for users and guest sessions
#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
    catalog: Arc<dyn CatalogStore>,
    guest_ttl: Duration,
    event_sender: Option<Arc<EventSender>>,
}

impl CartService {
    pub fn new(
        db_pool: Arc<DbPool>,
        catalog: Arc<dyn CatalogStore>,
        guest_ttl: Duration,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            catalog,
            guest_ttl,
            event_sender,
        }
    }

    /// Mints a guest id and opens its cart
    #[instrument(skip(self))]
    pub async fn create_guest_session(&self) -> Result<GuestSession, ServiceError> {
        if let Err(e) = self.purge_expired_guest_carts().await {
            warn!(error = %e, "failed to purge expired guest carts");
        }

        let guest_id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GUEST_ID_LEN)
            .map(char::from)
            .collect();
        let cart = self
            .get_or_create(&CallerIdentity::Guest(guest_id.clone()))
            .await?;

        Ok(GuestSession {
            guest_id,
            expires_at: cart
                .expires_at
                .unwrap_or_else(|| Utc::now() + self.guest_ttl),
        })
    }

    /// The caller's live cart. Expired guest carts are deleted and replaced;
    /// guest expiry slides forward on every access.
    pub async fn get_or_create(
        &self,
        identity: &CallerIdentity,
    ) -> Result<cart::Model, ServiceError> {
        let now = Utc::now();
        if let Some(cart) = self.active_cart(identity).await? {
            return self.touch(cart, now).await;
        }

        let guest_id = match identity {
            CallerIdentity::Guest(id) => Some(id.clone()),
            CallerIdentity::User(_) => None,
        };
        let new_cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(identity.user_id()),
            expires_at: Set(guest_id.as_ref().map(|_| now + self.guest_ttl)),
            guest_id: Set(guest_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match new_cart.insert(&*self.db_pool).await {
            Ok(cart) => {
                debug!(cart_id = %cart.id, owner = %identity, "created cart");
                Ok(cart)
            }
            Err(e) if is_unique_violation(&e) => find_cart(&*self.db_pool, identity)
                .await?
                .ok_or_else(|| ServiceError::InternalError("Cart vanished after insert race".into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Current cart without creating one. Expired guest carts count as absent.
    pub async fn active_cart(
        &self,
        identity: &CallerIdentity,
    ) -> Result<Option<cart::Model>, ServiceError> {
        match find_cart(&*self.db_pool, identity).await? {
            Some(cart) if cart.is_expired(Utc::now()) => {
                info!(cart_id = %cart.id, "discarding expired guest cart");
                delete_cart(&*self.db_pool, cart.id).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn touch(&self, cart: cart::Model, now: DateTime<Utc>) -> Result<cart::Model, ServiceError> {
        if cart.guest_id.is_none() {
            return Ok(cart);
        }
        let mut active: cart::ActiveModel = cart.into();
        active.expires_at = Set(Some(now + self.guest_ttl));
        active.updated_at = Set(now);
        Ok(active.update(&*self.db_pool).await?)
    }

    pub async fn view_cart(&self, identity: &CallerIdentity) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(identity).await?;
        self.render(cart).await
    }

    async fn render(&self, cart: cart::Model) -> Result<CartView, ServiceError> {
        let lines = cart_line::Entity::find()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .order_by_asc(cart_line::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;

        let mut views = Vec::with_capacity(lines.len());
        for line in lines {
            let Some(product) = self.catalog.get_product(line.product_id).await? else {
                warn!(product_id = %line.product_id, cart_id = %cart.id, "cart line references a missing product");
                continue;
            };
            let unit_price = product.effective_price();
            views.push(CartLineView {
                product_id: line.product_id,
                in_stock: product.in_stock(),
                product_name: product.name,
                quantity: line.quantity,
                selected: line.selected,
                unit_price,
                line_total: unit_price * Decimal::from(line.quantity),
            });
        }

        let selected: Vec<&CartLineView> = views.iter().filter(|l| l.selected).collect();
        Ok(CartView {
            cart_id: cart.id,
            guest_id: cart.guest_id,
            expires_at: cart.expires_at,
            selected_subtotal: selected.iter().map(|l| l.line_total).sum(),
            selected_count: selected.len(),
            lines: views,
        })
    }

    /// Adds a product, summing into an existing line for the same product
    #[instrument(skip(self, request), fields(owner = %identity, product_id = %request.product_id))]
    pub async fn add_item(
        &self,
        identity: &CallerIdentity,
        request: AddCartItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;
        if self.catalog.get_product(request.product_id).await?.is_none() {
            return Err(ServiceError::ProductNotFound(request.product_id));
        }

        let cart = self.get_or_create(identity).await?;
        let now = Utc::now();
        let db = &*self.db_pool;

        match find_line(db, cart.id, request.product_id).await? {
            Some(line) => {
                let quantity = line.quantity.saturating_add(request.quantity);
                if quantity > MAX_LINE_QUANTITY {
                    return Err(ServiceError::ValidationError(format!(
                        "Quantity cannot exceed {MAX_LINE_QUANTITY}"
                    )));
                }
                let mut active: cart_line::ActiveModel = line.into();
                active.quantity = Set(quantity);
                active.selected = Set(request.selected);
                active.updated_at = Set(now);
                active.update(db).await?;
            }
            None => {
                let line = cart_line::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(request.product_id),
                    quantity: Set(request.quantity),
                    selected: Set(request.selected),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                line.insert(db).await?;
            }
        }

        self.render(cart).await
    }

    #[instrument(skip(self, request), fields(owner = %identity, product_id = %product_id))]
    pub async fn update_item(
        &self,
        identity: &CallerIdentity,
        product_id: Uuid,
        request: UpdateCartItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;
        let cart = self.get_or_create(identity).await?;
        let line = find_line(&*self.db_pool, cart.id, product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {product_id} is not in the cart")))?;

        let mut active: cart_line::ActiveModel = line.into();
        if let Some(quantity) = request.quantity {
            active.quantity = Set(quantity);
        }
        if let Some(selected) = request.selected {
            active.selected = Set(selected);
        }
        active.updated_at = Set(Utc::now());
        active.update(&*self.db_pool).await?;

        self.render(cart).await
    }

    #[instrument(skip(self), fields(owner = %identity, product_id = %product_id))]
    pub async fn remove_item(
        &self,
        identity: &CallerIdentity,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(identity).await?;
        let deleted = cart_line::Entity::delete_many()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .filter(cart_line::Column::ProductId.eq(product_id))
            .exec(&*self.db_pool)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {product_id} is not in the cart"
            )));
        }
        self.render(cart).await
    }

    /// Merges a guest cart into the user's cart and deletes the guest cart.
    /// A missing or empty guest cart is a no-op.
    #[instrument(skip(self, guest_id), fields(user_id = %user_id))]
    pub async fn transfer_guest_cart(
        &self,
        guest_id: &str,
        user_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let guest = CallerIdentity::guest(guest_id)?;
        let user = CallerIdentity::User(user_id);

        let Some(guest_cart) = self.active_cart(&guest).await? else {
            return self.view_cart(&user).await;
        };
        let guest_lines = cart_line::Entity::find()
            .filter(cart_line::Column::CartId.eq(guest_cart.id))
            .all(&*self.db_pool)
            .await?;
        if guest_lines.is_empty() {
            delete_cart(&*self.db_pool, guest_cart.id).await?;
            return self.view_cart(&user).await;
        }

        let user_cart = self.get_or_create(&user).await?;
        let now = Utc::now();
        let txn = self.db_pool.begin().await?;

        for guest_line in &guest_lines {
            match find_line(&txn, user_cart.id, guest_line.product_id).await? {
                Some(existing) => {
                    let quantity = existing
                        .quantity
                        .saturating_add(guest_line.quantity)
                        .min(MAX_LINE_QUANTITY);
                    let mut active: cart_line::ActiveModel = existing.into();
                    active.quantity = Set(quantity);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }
                None => {
                    cart_line::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        cart_id: Set(user_cart.id),
                        product_id: Set(guest_line.product_id),
                        quantity: Set(guest_line.quantity),
                        selected: Set(guest_line.selected),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(&txn)
                    .await?;
                }
            }
        }
        delete_cart(&txn, guest_cart.id).await?;
        txn.commit().await?;

        info!(lines = guest_lines.len(), "transferred guest cart");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::GuestCartTransferred {
                    user_id,
                    lines: guest_lines.len(),
                })
                .await;
        }

        self.render(user_cart).await
    }

    /// Selected lines priced against the current catalog. Read-only.
    #[instrument(skip(self), fields(owner = %identity))]
    pub async fn resolve_checkout_items(
        &self,
        identity: &CallerIdentity,
    ) -> Result<CheckoutCart, ServiceError> {
        // Read-only: an expired guest cart counts as empty but is left in place
        let cart = find_cart(&*self.db_pool, identity)
            .await?
            .filter(|cart| !cart.is_expired(Utc::now()))
            .ok_or(ServiceError::EmptyCart)?;
        let lines = cart_line::Entity::find()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .filter(cart_line::Column::Selected.eq(true))
            .order_by_asc(cart_line::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self
                .catalog
                .get_product(line.product_id)
                .await?
                .ok_or(ServiceError::ProductNotFound(line.product_id))?;
            items.push(CheckoutItem {
                product,
                quantity: line.quantity,
            });
        }

        Ok(CheckoutCart {
            cart_id: cart.id,
            items,
        })
    }

    /// Takes purchased quantities out of a cart, deleting lines that reach
    /// zero. Returns how many lines were touched.
    pub async fn remove_purchased_lines<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
        purchased: &[(Uuid, i32)],
    ) -> Result<usize, DbErr> {
        let mut totals: HashMap<Uuid, i32> = HashMap::new();
        for (product_id, quantity) in purchased {
            *totals.entry(*product_id).or_default() += *quantity;
        }

        let mut touched = 0;
        for (product_id, quantity) in totals {
            let Some(line) = find_line(conn, cart_id, product_id).await? else {
                continue;
            };
            touched += 1;
            if line.quantity <= quantity {
                cart_line::Entity::delete_by_id(line.id).exec(conn).await?;
            } else {
                let remaining = line.quantity - quantity;
                let mut active: cart_line::ActiveModel = line.into();
                active.quantity = Set(remaining);
                active.updated_at = Set(Utc::now());
                active.update(conn).await?;
            }
        }
        Ok(touched)
    }

    pub async fn purge_expired_guest_carts(&self) -> Result<u64, ServiceError> {
        let expired: Vec<Uuid> = cart::Entity::find()
            .filter(cart::Column::ExpiresAt.lte(Utc::now()))
            .all(&*self.db_pool)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        cart_line::Entity::delete_many()
            .filter(cart_line::Column::CartId.is_in(expired.clone()))
            .exec(&*self.db_pool)
            .await?;
        let deleted = cart::Entity::delete_many()
            .filter(cart::Column::Id.is_in(expired))
            .exec(&*self.db_pool)
            .await?;
        debug!(count = deleted.rows_affected, "purged expired guest carts");
        Ok(deleted.rows_affected)
    }
}

async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    identity: &CallerIdentity,
) -> Result<Option<cart::Model>, DbErr> {
    let query = match identity {
        CallerIdentity::User(user_id) => cart::Entity::find().filter(cart::Column::UserId.eq(*user_id)),
        CallerIdentity::Guest(guest_id) => {
            cart::Entity::find().filter(cart::Column::GuestId.eq(guest_id.as_str()))
        }
    };
    query.one(conn).await
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
) -> Result<Option<cart_line::Model>, DbErr> {
    cart_line::Entity::find()
        .filter(cart_line::Column::CartId.eq(cart_id))
        .filter(cart_line::Column::ProductId.eq(product_id))
        .one(conn)
        .await
}

async fn delete_cart<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<(), DbErr> {
    cart_line::Entity::delete_many()
        .filter(cart_line::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    cart::Entity::delete_by_id(cart_id).exec(conn).await?;
    Ok(())
}
