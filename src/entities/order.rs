use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, FromJsonQueryResult};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Order aggregate. Line items are an embedded snapshot of the catalog at
/// checkout time; later price changes never touch them.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    /// Cart the order was built from, if any
    #[sea_orm(nullable)]
    pub cart_id: Option<Uuid>,

    #[sea_orm(column_type = "Json")]
    pub line_items: OrderLines,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub tax: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total: Decimal,
    pub currency: String,

    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,

    #[sea_orm(nullable)]
    pub payment_intent_id: Option<String>,
    pub is_paid: bool,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub payment_error_message: Option<String>,
    #[sea_orm(nullable)]
    pub refund_id: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub refund_amount: Option<Decimal>,
    #[sea_orm(nullable)]
    pub refunded_at: Option<DateTime<Utc>>,

    pub address_id: Uuid,
    pub payment_method_id: Uuid,
    #[sea_orm(nullable)]
    pub delivery_date: Option<NaiveDate>,
    #[sea_orm(nullable)]
    pub delivery_time_slot: Option<String>,
    pub is_pickup: bool,
    #[sea_orm(nullable)]
    pub pickup_location: Option<String>,
    #[sea_orm(nullable)]
    pub special_instructions: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

/// One purchased product, frozen at order time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    #[schema(value_type = String, example = "3.00")]
    pub unit_price: Decimal,
    #[schema(value_type = String, example = "6.00")]
    pub line_total: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct OrderLines(pub Vec<OrderLine>);

impl OrderLines {
    pub fn iter(&self) -> std::slice::Iter<'_, OrderLine> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<OrderLine>> for OrderLines {
    fn from(lines: Vec<OrderLine>) -> Self {
        OrderLines(lines)
    }
}

/// Fulfillment side of the order state
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum FulfillmentStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Processing")]
    Processing,
    #[sea_orm(string_value = "Shipped")]
    Shipped,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
    #[sea_orm(string_value = "PaymentFailed")]
    PaymentFailed,
    #[sea_orm(string_value = "Refunded")]
    Refunded,
}

/// Payment side of the order state, driven by processor events
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;

        if insert {
            let model: Model = active_model.clone().try_into().map_err(|_| {
                DbErr::Custom("Failed to convert ActiveModel to Model for validation".to_string())
            })?;
            let subtotal: Decimal = model.line_items.iter().map(|l| l.line_total).sum();
            if model.line_items.is_empty()
                || subtotal != model.subtotal
                || model.subtotal + model.tax != model.total
            {
                return Err(DbErr::Custom(
                    "Order totals do not match its line items".to_string(),
                ));
            }
        } else {
            active_model.updated_at = Set(Utc::now());
        }

        Ok(active_model)
    }
}
