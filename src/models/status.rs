//! Closed status enumerations for orders and gateway transactions.
//!
//! The gateway reports numeric status codes plus a free-text description; both are
//! normalized here into [`GatewayStatus`] before anything is persisted. Order
//! payment state only ever changes through the [`PaymentStatus::apply`] transition
//! table, so stale or duplicated notifications can never regress a paid order.

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::StringLen;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// Payment state of an order. Stored lowercase.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Delivery state of an order. Independent axis from payment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Stored status of a gateway transaction, in the gateway's own vocabulary.
///
/// `Refunded` is a first-class state here: the gateway reports reversals as status
/// code 3 and the stored row keeps that meaning instead of collapsing it to FAILED.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum GatewayStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl GatewayStatus {
    /// Maps the gateway's numeric status code and human-readable description to a
    /// stored status.
    ///
    /// Fixed table: 1 → COMPLETED, 2 → FAILED, 3 (reversed) → REFUNDED, 0 or any
    /// unrecognized code → PENDING. The gateway encodes cancellation inconsistently
    /// across code versions, so a description containing "cancel" (any case)
    /// overrides the numeric code.
    pub fn from_gateway(status_code: i64, description: &str) -> Self {
        if description.to_ascii_lowercase().contains("cancel") {
            return GatewayStatus::Cancelled;
        }
        match status_code {
            1 => GatewayStatus::Completed,
            2 => GatewayStatus::Failed,
            3 => GatewayStatus::Refunded,
            _ => GatewayStatus::Pending,
        }
    }

    /// The payment event this gateway status drives, if any. A still-pending
    /// transaction carries no event.
    pub fn as_payment_event(self) -> Option<PaymentEvent> {
        match self {
            GatewayStatus::Pending => None,
            GatewayStatus::Completed => Some(PaymentEvent::GatewayCompleted),
            GatewayStatus::Failed => Some(PaymentEvent::GatewayFailed),
            GatewayStatus::Refunded => Some(PaymentEvent::GatewayRefunded),
            GatewayStatus::Cancelled => Some(PaymentEvent::GatewayCancelled),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, GatewayStatus::Pending)
    }
}

/// Events that drive the order payment state machine. Each corresponds to a
/// terminal gateway report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEvent {
    GatewayCompleted,
    GatewayFailed,
    GatewayCancelled,
    GatewayRefunded,
}

impl PaymentStatus {
    /// Explicit transition table (old state x event -> new state).
    ///
    /// Rules a reader should be able to check row by row:
    /// - a completed order never regresses to failed or cancelled, no matter how
    ///   late or out-of-order the gateway's notifications arrive;
    /// - a refund is honored from any state and is itself terminal;
    /// - a failed or cancelled order becomes completed if the gateway later
    ///   reports success (the gateway is the source of truth for money movement).
    pub fn apply(self, event: PaymentEvent) -> PaymentStatus {
        use PaymentEvent::*;
        use PaymentStatus::*;
        match (self, event) {
            (Pending, GatewayCompleted) => Completed,
            (Pending, GatewayFailed) => Failed,
            (Pending, GatewayCancelled) => Cancelled,
            (Pending, GatewayRefunded) => Refunded,

            (Completed, GatewayCompleted) => Completed,
            (Completed, GatewayFailed) => Completed,
            (Completed, GatewayCancelled) => Completed,
            (Completed, GatewayRefunded) => Refunded,

            (Failed, GatewayCompleted) => Completed,
            (Failed, GatewayFailed) => Failed,
            (Failed, GatewayCancelled) => Cancelled,
            (Failed, GatewayRefunded) => Refunded,

            (Cancelled, GatewayCompleted) => Completed,
            (Cancelled, GatewayFailed) => Cancelled,
            (Cancelled, GatewayCancelled) => Cancelled,
            (Cancelled, GatewayRefunded) => Refunded,

            (Refunded, _) => Refunded,
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, PaymentStatus::Completed)
    }
}
