use crate::{
    db::DbPool,
    entities::gateway_transaction::{self, Entity as GatewayTransactionEntity},
    entities::order::{self, Entity as OrderEntity},
    entities::order_item,
    entities::staged_order::{self, Entity as StagedOrderEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    models::{DeliveryStatus, GatewayStatus, PaymentStatus},
    services::products::deduct_stock_floored,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Result of driving a transaction through the completion transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// This call performed the transition: the order is now completed and stock
    /// was deducted exactly once.
    Completed { order_id: Uuid },
    /// The order was already settled (completed, or refunded after completion);
    /// nothing was changed.
    AlreadyCompleted { order_id: Uuid },
}

impl CompletionOutcome {
    pub fn order_id(self) -> Uuid {
        match self {
            CompletionOutcome::Completed { order_id }
            | CompletionOutcome::AlreadyCompleted { order_id } => order_id,
        }
    }
}

/// Merges a fresh gateway report into a stored transaction status.
///
/// A stored COMPLETED only ever moves to REFUNDED; REFUNDED is terminal; a
/// PENDING report never overwrites anything.
fn merge_transaction_status(stored: GatewayStatus, incoming: GatewayStatus) -> GatewayStatus {
    match (stored, incoming) {
        (GatewayStatus::Refunded, _) => GatewayStatus::Refunded,
        (GatewayStatus::Completed, GatewayStatus::Refunded) => GatewayStatus::Refunded,
        (GatewayStatus::Completed, _) => GatewayStatus::Completed,
        (_, GatewayStatus::Pending) => stored,
        (_, incoming) => incoming,
    }
}

/// Owns every write to order payment state.
///
/// All paths that learn a payment outcome (callback, active verification, the
/// reconciliation sweep) funnel into [`PaymentService::complete_payment`] or
/// [`PaymentService::record_failure`], so the idempotency and non-regression
/// rules live in exactly one place.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// The idempotent completion transition.
    ///
    /// Runs in a single database transaction:
    /// 1. materialize the order from its staged cart if no order row exists yet;
    /// 2. claim the completion with a conditional update restricted to the
    ///    non-settled states (pending, failed, cancelled) — zero rows affected
    ///    means the order is already completed or refunded and this call
    ///    becomes a read-only no-op;
    /// 3. only the claiming caller deducts stock, one floored atomic decrement
    ///    per line item.
    ///
    /// Refunded is excluded from the claim on purpose: a refunded order already
    /// had its stock deducted once, so a late duplicate COMPLETED notification
    /// must neither deduct again nor regress the status.
    ///
    /// Any error after the claim rolls the whole transaction back, so the order
    /// is never left marked completed with stock undeducted.
    #[instrument(skip(self), fields(tracking_id = %tracking_id))]
    pub async fn complete_payment(
        &self,
        tracking_id: &str,
    ) -> Result<CompletionOutcome, ServiceError> {
        let db_txn = self.db_pool.begin().await?;

        let transaction = GatewayTransactionEntity::find()
            .filter(gateway_transaction::Column::TrackingId.eq(tracking_id))
            .one(&db_txn)
            .await?
            .ok_or_else(|| ServiceError::TransactionNotFound(tracking_id.to_string()))?;

        let (order_id, materialized) = self.resolve_or_materialize(&db_txn, &transaction).await?;

        let claim = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Completed),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.is_in([
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ]))
            .exec(&db_txn)
            .await?;

        if claim.rows_affected == 0 {
            // Lost the race, or a duplicate notification for an already
            // completed or refunded order. Still make sure the transaction row
            // is linked and terminal before finishing.
            self.finalize_transaction(&db_txn, &transaction, order_id, GatewayStatus::Completed)
                .await?;
            db_txn.commit().await?;
            info!(order_id = %order_id, "Order already settled, nothing to do");
            return Ok(CompletionOutcome::AlreadyCompleted { order_id });
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&db_txn)
            .await?;

        let mut deductions = Vec::with_capacity(items.len());
        for item in &items {
            let remaining = deduct_stock_floored(&db_txn, item.product_id, item.quantity).await?;
            deductions.push((item.product_id, item.quantity, remaining));
        }

        self.finalize_transaction(&db_txn, &transaction, order_id, GatewayStatus::Completed)
            .await?;

        db_txn.commit().await?;

        if materialized {
            self.event_sender
                .send(Event::OrderCreated(order_id))
                .await
                .map_err(ServiceError::EventError)?;
        }
        for (product_id, quantity, remaining) in deductions {
            self.event_sender
                .send(Event::StockDeducted {
                    product_id,
                    quantity,
                    remaining,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }
        self.event_sender
            .send(Event::PaymentCompleted {
                order_id,
                tracking_id: tracking_id.to_string(),
                amount: transaction.amount,
            })
            .await
            .map_err(ServiceError::EventError)?;

        info!(order_id = %order_id, amount = %transaction.amount, "Payment completed, stock deducted");
        Ok(CompletionOutcome::Completed { order_id })
    }

    /// Records a terminal non-success outcome (failed, cancelled, or refunded).
    ///
    /// The stored transaction status is merged under the non-regression rule, and
    /// any materialized order moves through its transition table, which among
    /// other things refuses to regress a completed order on a stale failure.
    #[instrument(skip(self), fields(tracking_id = %tracking_id, status = %status))]
    pub async fn record_failure(
        &self,
        tracking_id: &str,
        status: GatewayStatus,
        reason: &str,
    ) -> Result<(), ServiceError> {
        debug_assert!(status != GatewayStatus::Completed);

        let transaction = GatewayTransactionEntity::find()
            .filter(gateway_transaction::Column::TrackingId.eq(tracking_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::TransactionNotFound(tracking_id.to_string()))?;

        let merged = merge_transaction_status(transaction.status, status);
        let order_id = transaction.order_id;
        if merged != transaction.status {
            let mut active: gateway_transaction::ActiveModel = transaction.into();
            active.status = Set(merged);
            active.updated_at = Set(Some(Utc::now()));
            active.update(&*self.db_pool).await?;
        }

        if let Some(order_id) = order_id {
            if let Some(event) = status.as_payment_event() {
                let order = OrderEntity::find_by_id(order_id)
                    .one(&*self.db_pool)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", order_id))
                    })?;
                let next = order.payment_status.apply(event);
                if next != order.payment_status {
                    let version = order.version;
                    let mut active: order::ActiveModel = order.into();
                    active.payment_status = Set(next);
                    // A dead payment means nothing ships.
                    active.delivery_status = Set(DeliveryStatus::Cancelled);
                    active.updated_at = Set(Some(Utc::now()));
                    active.version = Set(version + 1);
                    active.update(&*self.db_pool).await?;
                    info!(order_id = %order_id, new_status = %next, "Order payment status moved");
                } else {
                    warn!(order_id = %order_id, incoming = %status, kept = %next, "Stale gateway report ignored");
                }
            }
        }

        self.event_sender
            .send(Event::PaymentFailed {
                order_id,
                tracking_id: tracking_id.to_string(),
                reason: reason.to_string(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(())
    }

    /// Finds the order for a transaction, creating it from the staged cart when
    /// this is the first terminal notification for the tracking id.
    ///
    /// Returns the order id and whether this call created the row.
    async fn resolve_or_materialize(
        &self,
        db_txn: &DatabaseTransaction,
        transaction: &gateway_transaction::Model,
    ) -> Result<(Uuid, bool), ServiceError> {
        if let Some(order_id) = transaction.order_id {
            return Ok((order_id, false));
        }

        // A previous attempt may have materialized the order but died before
        // linking it back; the unique order number recovers the association.
        if let Some(existing) = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(transaction.merchant_reference.as_str()))
            .one(db_txn)
            .await?
        {
            return Ok((existing.id, false));
        }

        let staged = StagedOrderEntity::find()
            .filter(staged_order::Column::TrackingId.eq(transaction.tracking_id.as_str()))
            .one(db_txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No staged order for tracking id {}",
                    transaction.tracking_id
                ))
            })?;

        let line_items = staged.line_items()?;
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(staged.merchant_reference.clone()),
            customer_id: Set(staged.customer_id),
            payment_status: Set(PaymentStatus::Pending),
            delivery_status: Set(DeliveryStatus::Pending),
            total_amount: Set(staged.total_amount),
            currency: Set(staged.currency.clone()),
            delivery_address: Set(staged.delivery_address.clone()),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        }
        .insert(db_txn)
        .await?;

        for item in line_items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(item.total_price),
                created_at: Set(now),
            }
            .insert(db_txn)
            .await?;
        }

        Ok((order_id, true))
    }

    /// Links the transaction row to its order and merges in the final status.
    async fn finalize_transaction<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction: &gateway_transaction::Model,
        order_id: Uuid,
        status: GatewayStatus,
    ) -> Result<(), ServiceError> {
        let merged = merge_transaction_status(transaction.status, status);
        if transaction.order_id == Some(order_id) && transaction.status == merged {
            return Ok(());
        }
        let mut active: gateway_transaction::ActiveModel = transaction.clone().into();
        active.order_id = Set(Some(order_id));
        active.status = Set(merged);
        active.updated_at = Set(Some(Utc::now()));
        active.update(conn).await?;
        Ok(())
    }
}
