use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{DeliveryStatus, PaymentStatus};

/// An order row exists only for paid-or-settling carts: it is materialized by the
/// payment completion transition, never at checkout time.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// The merchant reference the order was submitted to the gateway under.
    #[validate(length(min = 1, max = 64, message = "Order number is required"))]
    #[sea_orm(unique)]
    pub order_number: String,

    pub customer_id: Uuid,
    pub payment_status: PaymentStatus,
    pub delivery_status: DeliveryStatus,

    /// Computed once at creation from snapshotted line prices plus the delivery
    /// fee; never recomputed afterwards.
    pub total_amount: Decimal,
    pub currency: String,

    pub delivery_address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::gateway_transaction::Entity")]
    GatewayTransaction,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::gateway_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GatewayTransaction.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
