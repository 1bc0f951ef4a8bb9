//! IPN (instant payment notification) parsing.
//!
//! The gateway delivers callbacks as GET query parameters, form-encoded POST
//! bodies, or JSON POST bodies depending on merchant settings and gateway
//! version. All three transports are normalized into one [`IpnNotification`]
//! before any business logic runs.

use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Canonical inbound gateway notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpnNotification {
    #[serde(rename = "OrderTrackingId", alias = "orderTrackingId", default)]
    pub order_tracking_id: Option<String>,

    #[serde(
        rename = "OrderMerchantReference",
        alias = "orderMerchantReference",
        default
    )]
    pub order_merchant_reference: Option<String>,

    #[serde(
        rename = "OrderNotificationType",
        alias = "orderNotificationType",
        default
    )]
    pub order_notification_type: Option<String>,

    #[serde(rename = "OrderCreatedDate", alias = "orderCreatedDate", default)]
    pub order_created_date: Option<String>,
}

/// What the notification claims happened. The claim is only trusted for the
/// unambiguous terminal types; everything else goes through a live status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    Completed,
    Failed,
    Cancelled,
    /// IPNCHANGE, empty, or unrecognized: the notification type cannot be
    /// trusted and the real status must be queried from the gateway.
    Ambiguous,
}

impl IpnNotification {
    /// Parses a raw query string (`OrderTrackingId=..&OrderNotificationType=..`).
    pub fn from_query(query: &str) -> Result<Self, ServiceError> {
        serde_urlencoded::from_str(query)
            .map_err(|e| ServiceError::BadRequest(format!("invalid callback query: {}", e)))
    }

    /// Parses a form-encoded POST body.
    pub fn from_form(body: &[u8]) -> Result<Self, ServiceError> {
        serde_urlencoded::from_bytes(body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid callback form body: {}", e)))
    }

    /// Parses a JSON POST body.
    pub fn from_json(body: &[u8]) -> Result<Self, ServiceError> {
        serde_json::from_slice(body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid callback json body: {}", e)))
    }

    /// Both identifiers missing means there is nothing to resolve against.
    pub fn has_identifiers(&self) -> bool {
        self.order_tracking_id.as_deref().is_some_and(|s| !s.is_empty())
            || self
                .order_merchant_reference
                .as_deref()
                .is_some_and(|s| !s.is_empty())
    }

    /// Classifies the claimed notification type.
    pub fn notification_type(&self) -> NotificationType {
        match self
            .order_notification_type
            .as_deref()
            .unwrap_or("")
            .to_ascii_uppercase()
            .as_str()
        {
            "COMPLETED" | "SUCCESS" => NotificationType::Completed,
            "FAILED" => NotificationType::Failed,
            "CANCELLED" | "CANCELED" => NotificationType::Cancelled,
            _ => NotificationType::Ambiguous,
        }
    }
}
