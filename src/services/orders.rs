use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::DbPool;
use crate::entities::order::{self, FulfillmentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::fulfillment::{FulfillmentReconciler, ReconcileReport};
use crate::services::order_locks::{OrderLockGuard, OrderLocks};
use crate::services::order_state::{
    apply_patch, check_cancellable, check_manual_transition, plan_payment_transition,
    PaymentOutcome, TransitionPlan, NON_CANCELLABLE,
};

/// Outcome of applying a payment event to an order
#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub order: order::Model,
    /// False when the event was a duplicate or superseded
    pub applied: bool,
    pub reconciliation: Option<ReconcileReport>,
}

/// Order reads and every write after creation
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    locks: OrderLocks,
    reconciler: FulfillmentReconciler,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        reconciler: FulfillmentReconciler,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            locks: OrderLocks::new(),
            reconciler,
            event_sender,
        }
    }

    async fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    /// Loads an order the caller owns (admins may read any order)
    pub async fn get_order_for(
        &self,
        order_id: Uuid,
        caller: &AuthUser,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        if !caller.can_access(order.user_id) {
            return Err(ServiceError::Unauthorized(format!(
                "Order {order_id} does not belong to the caller"
            )));
        }
        Ok(order)
    }

    /// Newest first. `page` is 1-based.
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(&*self.db_pool, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    pub async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db_pool)
            .await?)
    }

    pub async fn lock_order(&self, order_id: Uuid) -> OrderLockGuard {
        self.locks.acquire(order_id).await
    }

    /// Cancels an order the caller owns. Already cancelled orders come back
    /// unchanged; shipped, delivered and refunded ones are refused.
    #[instrument(skip(self, caller), fields(order_id = %order_id, user_id = %caller.user_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        caller: &AuthUser,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get_order_for(order_id, caller).await?;
        let _guard = self.lock_order(order_id).await;
        let order = self.get_order(order.id).await?;

        if !check_cancellable(order.status)? {
            return Ok(order);
        }

        let result = order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(FulfillmentStatus::Cancelled),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_not_in(NON_CANCELLABLE.iter().copied()))
            .exec(&*self.db_pool)
            .await?;

        let current = self.get_order(order_id).await?;
        if result.rows_affected == 0 {
            // Lost a race with another writer; report against the fresh row
            check_cancellable(current.status)?;
            return Ok(current);
        }

        info!(previous = %order.status, "order cancelled");
        counter!("pantry.orders.cancelled", 1);
        self.publish(Event::OrderCancelled(order_id)).await;
        self.publish(Event::OrderStatusChanged {
            order_id,
            old_status: order.status,
            new_status: FulfillmentStatus::Cancelled,
        })
        .await;
        Ok(current)
    }

    /// Administrative fulfillment status change
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: FulfillmentStatus,
    ) -> Result<order::Model, ServiceError> {
        let _guard = self.lock_order(order_id).await;
        let order = self.get_order(order_id).await?;

        if !check_manual_transition(order.status, new_status)? {
            return Ok(order);
        }

        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(order.status))
            .exec(&*self.db_pool)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidState(
                "Order status changed concurrently; reload and retry".to_string(),
            ));
        }

        info!(previous = %order.status, "order status updated");
        self.publish(Event::OrderStatusChanged {
            order_id,
            old_status: order.status,
            new_status,
        })
        .await;
        if new_status == FulfillmentStatus::Cancelled {
            self.publish(Event::OrderCancelled(order_id)).await;
        }
        self.get_order(order_id).await
    }

    /// Idempotently applies a payment outcome. Webhooks, synchronous
    /// confirmation and refunds all funnel through here.
    pub async fn apply_payment_outcome(
        &self,
        order_id: Uuid,
        outcome: PaymentOutcome,
    ) -> Result<TransitionResult, ServiceError> {
        let guard = self.lock_order(order_id).await;
        self.apply_payment_outcome_locked(&guard, outcome).await
    }

    /// Same as [`Self::apply_payment_outcome`] for a caller already holding
    /// the order's lock.
    #[instrument(skip(self, guard, outcome), fields(order_id = %guard.order_id(), target = %outcome.target()))]
    pub async fn apply_payment_outcome_locked(
        &self,
        guard: &OrderLockGuard,
        outcome: PaymentOutcome,
    ) -> Result<TransitionResult, ServiceError> {
        let order_id = guard.order_id();
        let order = self.get_order(order_id).await?;
        let now = Utc::now();

        let (patch, reconcile) = match plan_payment_transition(&order, &outcome, now) {
            TransitionPlan::Apply { patch, reconcile } => (patch, reconcile),
            TransitionPlan::NoOp(reason) => {
                info!(%reason, "payment outcome already reflected");
                counter!("pantry.payments.transitions", 1, "result" => "noop");
                return Ok(TransitionResult {
                    order,
                    applied: false,
                    reconciliation: None,
                });
            }
        };

        // The status guard makes the write safe across processes too
        let result = order::Entity::update_many()
            .set(patch.clone().into_active_model())
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.is_in(outcome.allowed_from().iter().copied()))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            warn!("payment status moved underneath the transition");
            counter!("pantry.payments.transitions", 1, "result" => "noop");
            return Ok(TransitionResult {
                order: self.get_order(order_id).await?,
                applied: false,
                reconciliation: None,
            });
        }

        let updated = apply_patch(order.clone(), &patch);
        counter!("pantry.payments.transitions", 1, "result" => "applied");
        info!(
            payment_status = %updated.payment_status,
            status = %updated.status,
            "payment outcome applied"
        );

        self.publish(Event::PaymentStatusChanged {
            order_id,
            old_status: order.payment_status,
            new_status: updated.payment_status,
        })
        .await;
        if order.status != updated.status {
            self.publish(Event::OrderStatusChanged {
                order_id,
                old_status: order.status,
                new_status: updated.status,
            })
            .await;
        }
        match &outcome {
            PaymentOutcome::Succeeded { payment_intent_id } => {
                self.publish(Event::PaymentSucceeded {
                    order_id,
                    payment_intent_id: payment_intent_id.clone(),
                })
                .await;
                if !reconcile {
                    warn!("payment captured for a cancelled order; refund required");
                }
            }
            PaymentOutcome::Failed { .. } => {
                self.publish(Event::PaymentFailed {
                    order_id,
                    message: updated.payment_error_message.clone().unwrap_or_default(),
                })
                .await;
            }
            PaymentOutcome::Refunded { refund_id, amount } => {
                self.publish(Event::OrderRefunded {
                    order_id,
                    refund_id: refund_id.clone(),
                    amount: *amount,
                })
                .await;
            }
            PaymentOutcome::Processing { .. } => {}
        }

        let reconciliation = if reconcile {
            Some(self.reconciler.reconcile(&updated).await)
        } else {
            None
        };

        Ok(TransitionResult {
            order: updated,
            applied: true,
            reconciliation,
        })
    }
}
