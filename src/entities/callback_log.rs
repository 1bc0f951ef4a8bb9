use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only audit record of every inbound gateway notification. Rows are written
/// before any processing and only the `processed`/`error` columns are ever updated;
/// nothing here participates in control flow.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "callback_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tracking_id: Option<String>,
    pub merchant_reference: Option<String>,
    pub notification_type: Option<String>,

    /// Raw notification as received, re-encoded as JSON regardless of transport.
    pub raw_payload: String,

    pub processed: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
