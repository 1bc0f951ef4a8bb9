use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    models::{DeliveryStatus, PaymentStatus},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub payment_status: PaymentStatus,
    pub delivery_status: DeliveryStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

impl From<OrderModel> for OrderResponse {
    fn from(model: OrderModel) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            customer_id: model.customer_id,
            payment_status: model.payment_status,
            delivery_status: model.delivery_status,
            total_amount: model.total_amount,
            currency: model.currency,
            delivery_address: model.delivery_address,
            notes: model.notes,
            created_at: model.created_at,
            updated_at: model.updated_at,
            version: model.version,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(model: order_item::Model) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            quantity: model.quantity,
            unit_price: model.unit_price,
            total_price: model.total_price,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UpdateDeliveryStatusRequest {
    pub delivery_status: DeliveryStatus,
    pub notes: Option<String>,
}

/// Read side of the order ledger, plus the delivery-status operational axis.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemResponse>, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db_pool)
            .await?;
        Ok(items.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db_pool, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Updates the delivery axis of an order.
    ///
    /// Advancing delivery past pending while payment is not completed is allowed
    /// but logged: it usually means an operator jumped the gun on an unpaid
    /// order.
    #[instrument(skip(self, request), fields(order_id = %order_id, new_status = %request.delivery_status))]
    pub async fn update_delivery_status(
        &self,
        order_id: Uuid,
        request: UpdateDeliveryStatusRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let existing = OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !existing.payment_status.is_completed()
            && request.delivery_status != DeliveryStatus::Pending
            && request.delivery_status != DeliveryStatus::Cancelled
        {
            warn!(
                order_id = %order_id,
                payment_status = %existing.payment_status,
                delivery_status = %request.delivery_status,
                "Advancing delivery on an order whose payment is not completed"
            );
        }

        let old_status = existing.delivery_status;
        let version = existing.version;
        let mut active: order::ActiveModel = existing.into();
        active.delivery_status = Set(request.delivery_status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        if let Some(notes) = request.notes {
            active.notes = Set(Some(notes));
        }

        let updated = active.update(&*self.db_pool).await?;
        info!(order_id = %order_id, old_status = %old_status, new_status = %updated.delivery_status, "Delivery status updated");
        Ok(updated.into())
    }
}
