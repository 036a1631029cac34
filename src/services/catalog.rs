use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::product;
use crate::errors::ServiceError;

const MAX_STOCK_UPDATE_ATTEMPTS: usize = 5;

/// What checkout needs to know about a product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub is_on_sale: bool,
    pub stock_quantity: i32,
}

impl ProductSnapshot {
    pub fn in_stock(&self) -> bool {
        self.stock_quantity > 0
    }

    /// Sale price when the product is on sale and has one, list price otherwise
    pub fn effective_price(&self) -> Decimal {
        match (self.is_on_sale, self.discount_price) {
            (true, Some(discount)) => discount,
            _ => self.price,
        }
    }
}

impl From<product::Model> for ProductSnapshot {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            price: model.price,
            discount_price: model.discount_price,
            is_on_sale: model.is_on_sale,
            stock_quantity: model.stock_quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub previous: i32,
    pub remaining: i32,
    /// The decrement asked for more than was on hand
    pub clamped: bool,
}

/// Stock never goes below zero
pub fn remaining_after_decrement(current: i32, quantity: i32) -> (i32, bool) {
    let quantity = quantity.max(0);
    if current >= quantity {
        (current - quantity, false)
    } else {
        (0, true)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product(&self, product_id: Uuid) -> Result<Option<ProductSnapshot>, ServiceError>;

    async fn decrement_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<StockLevel, ServiceError>;
}

/// Catalog backed by the `products` table
#[derive(Clone)]
pub struct DbCatalogStore {
    db_pool: Arc<DbPool>,
}

impl DbCatalogStore {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl CatalogStore for DbCatalogStore {
    async fn get_product(&self, product_id: Uuid) -> Result<Option<ProductSnapshot>, ServiceError> {
        let product = product::Entity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?;
        Ok(product.map(ProductSnapshot::from))
    }

    /// Compare-and-set on the current quantity, retried on contention
    #[instrument(skip(self), fields(product_id = %product_id, quantity))]
    async fn decrement_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<StockLevel, ServiceError> {
        for attempt in 1..=MAX_STOCK_UPDATE_ATTEMPTS {
            let current = product::Entity::find_by_id(product_id)
                .one(&*self.db_pool)
                .await?
                .ok_or(ServiceError::ProductNotFound(product_id))?
                .stock_quantity;

            let (remaining, clamped) = remaining_after_decrement(current, quantity);
            let result = product::Entity::update_many()
                .col_expr(product::Column::StockQuantity, Expr::value(remaining))
                .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::StockQuantity.eq(current))
                .exec(&*self.db_pool)
                .await?;

            if result.rows_affected == 1 {
                if clamped {
                    warn!(current, quantity, "stock decrement clamped at zero");
                }
                return Ok(StockLevel {
                    product_id,
                    previous: current,
                    remaining,
                    clamped,
                });
            }
            debug!(attempt, "stock changed concurrently, retrying");
        }

        Err(ServiceError::InternalError(format!(
            "Stock for product {product_id} kept changing during update"
        )))
    }
}
