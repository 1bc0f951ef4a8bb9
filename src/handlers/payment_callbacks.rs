use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::header::CONTENT_TYPE,
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{errors::ServiceError, pesapal::ipn::IpnNotification, AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/payments/callback", get(callback_get).post(callback_post))
}

/// Body returned to the gateway's IPN delivery. The gateway only checks the
/// status code, but the payload makes manual replays debuggable.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CallbackResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "orderId", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/callback",
    params(
        ("OrderTrackingId" = Option<String>, Query, description = "Gateway tracking id"),
        ("OrderMerchantReference" = Option<String>, Query, description = "Merchant reference"),
        ("OrderNotificationType" = Option<String>, Query, description = "Notification type"),
    ),
    responses(
        (status = 200, description = "Notification processed", body = CallbackResponse),
        (status = 400, description = "Notification missing identifiers", body = crate::errors::ErrorResponse),
        (status = 404, description = "No matching transaction", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn callback_get(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<CallbackResponse>, ServiceError> {
    let raw = query.unwrap_or_default();
    let notification = IpnNotification::from_query(&raw)?;
    process(state, notification, &raw).await
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/callback",
    request_body = String,
    responses(
        (status = 200, description = "Notification processed", body = CallbackResponse),
        (status = 400, description = "Notification missing identifiers", body = crate::errors::ErrorResponse),
        (status = 404, description = "No matching transaction", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn callback_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackResponse>, ServiceError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    // The gateway has shipped both encodings over the years; accept either.
    let notification = if content_type.starts_with("application/json") {
        IpnNotification::from_json(&body)?
    } else {
        IpnNotification::from_form(&body)?
    };

    let raw = String::from_utf8_lossy(&body).into_owned();
    process(state, notification, &raw).await
}

async fn process(
    state: AppState,
    notification: IpnNotification,
    raw_payload: &str,
) -> Result<Json<CallbackResponse>, ServiceError> {
    info!(
        tracking_id = ?notification.order_tracking_id,
        notification_type = ?notification.order_notification_type,
        "Gateway callback received"
    );
    let result = state
        .services
        .reconciliation
        .process_callback(notification, raw_payload)
        .await?;
    Ok(Json(CallbackResponse {
        success: true,
        message: result.message,
        order_id: result.order_id,
    }))
}
