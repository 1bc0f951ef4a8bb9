use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::GatewayStatus;

/// One row per payment attempt submitted to the gateway. Exactly one transaction is
/// authoritative per order; a retried checkout issues a fresh transaction with a
/// fresh merchant reference.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gateway_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Gateway-assigned tracking id.
    #[sea_orm(unique)]
    pub tracking_id: String,

    /// Merchant-assigned reference (`ORDER-<timestamp>-<random>`).
    #[sea_orm(unique)]
    pub merchant_reference: String,

    /// Set once the order row is materialized by the completion transition.
    pub order_id: Option<Uuid>,

    pub status: GatewayStatus,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
