use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{address, payment_method, user};
use crate::errors::ServiceError;
use crate::payments::{CustomerRequest, PaymentProcessor};

/// Read access to the user-owned records checkout depends on
#[derive(Clone)]
pub struct AccountService {
    db_pool: Arc<DbPool>,
}

impl AccountService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn find_user(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {user_id} not found")))
    }

    /// Address `address_id`, provided it belongs to `user_id`
    pub async fn owned_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<address::Model, ServiceError> {
        address::Entity::find_by_id(address_id)
            .filter(address::Column::UserId.eq(user_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidAddress(format!("Address {address_id} not found for this user"))
            })
    }

    pub async fn owned_payment_method(
        &self,
        user_id: Uuid,
        payment_method_id: Uuid,
    ) -> Result<payment_method::Model, ServiceError> {
        payment_method::Entity::find_by_id(payment_method_id)
            .filter(payment_method::Column::UserId.eq(user_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidPaymentMethod(format!(
                    "Payment method {payment_method_id} not found for this user"
                ))
            })
    }

    /// Returns the user's processor customer id, creating and caching one on
    /// first use. Concurrent first uses converge on whichever id was stored
    /// first.
    #[instrument(skip(self, user, processor), fields(user_id = %user.id))]
    pub async fn ensure_processor_customer(
        &self,
        user: &user::Model,
        processor: &dyn PaymentProcessor,
    ) -> Result<String, ServiceError> {
        if let Some(existing) = &user.processor_customer_id {
            return Ok(existing.clone());
        }

        let customer = processor
            .create_customer(CustomerRequest {
                email: user.email.clone(),
                name: user.full_name(),
                user_id: user.id,
            })
            .await?;

        let stored = user::Entity::update_many()
            .col_expr(
                user::Column::ProcessorCustomerId,
                Expr::value(customer.id.clone()),
            )
            .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(user::Column::Id.eq(user.id))
            .filter(user::Column::ProcessorCustomerId.is_null())
            .exec(&*self.db_pool)
            .await?;

        if stored.rows_affected == 1 {
            info!(customer_id = %customer.id, "created processor customer");
            return Ok(customer.id);
        }

        let winner = self.find_user(user.id).await?.processor_customer_id;
        match winner {
            Some(id) => {
                warn!(orphaned = %customer.id, kept = %id, "processor customer created concurrently");
                Ok(id)
            }
            None => Err(ServiceError::InternalError(
                "Processor customer id could not be stored".to_string(),
            )),
        }
    }
}
