use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ActiveValue::Set, ConnectionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Catalog product. Stock is the only field the order lifecycle mutates.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Product name must be between 1 and 255 characters"
    ))]
    pub name: String,

    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,

    /// List price
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    #[validate(custom = "validate_non_negative")]
    pub price: Decimal,

    /// Sale price, only honoured while `is_on_sale` is set
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    #[validate(custom = "validate_non_negative")]
    pub discount_price: Option<Decimal>,

    pub is_on_sale: bool,

    #[validate(range(min = 0, message = "Stock quantity cannot be negative"))]
    pub stock_quantity: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Derived, never stored
    pub fn in_stock(&self) -> bool {
        self.stock_quantity > 0
    }
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("negative_price"));
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.is_on_sale {
                active_model.is_on_sale = Set(false);
            }
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
            active_model.updated_at = Set(now);

            let model: Model = active_model.clone().try_into().map_err(|_| {
                DbErr::Custom("Failed to convert ActiveModel to Model for validation".to_string())
            })?;
            if let Err(err) = model.validate() {
                return Err(DbErr::Custom(format!("Validation error: {}", err)));
            }
        } else {
            active_model.updated_at = Set(now);
        }

        Ok(active_model)
    }
}
