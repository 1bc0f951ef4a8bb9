use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything needed to materialize an order once payment is confirmed, parked at
/// checkout time and keyed by tracking id. Consumed (read, not deleted) by the
/// completion transition.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "staged_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub tracking_id: String,

    pub merchant_reference: String,
    pub customer_id: Uuid,
    pub total_amount: Decimal,
    pub currency: String,
    pub delivery_address: Option<String>,

    /// JSON array of [`StagedLineItem`] with unit prices snapshotted at checkout.
    pub items: Json,

    pub created_at: DateTime<Utc>,
}

/// Line item shape serialized into [`Model::items`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedLineItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl Model {
    pub fn line_items(&self) -> Result<Vec<StagedLineItem>, serde_json::Error> {
        serde_json::from_value(self.items.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
