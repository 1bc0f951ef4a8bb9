use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::reconciliation::{SweepReport, VerificationResult},
    ApiResponse, AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments/status", post(verify_payment))
        .route("/payments/reconcile", post(run_reconciliation))
}

/// Identifies a payment either by the gateway tracking id or by the order it
/// settled into.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PaymentStatusRequest {
    #[serde(rename = "orderTrackingId")]
    pub order_tracking_id: Option<String>,
    #[serde(rename = "orderId")]
    pub order_id: Option<Uuid>,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/status",
    request_body = PaymentStatusRequest,
    responses(
        (status = 200, description = "Live status fetched from the gateway and applied", body = ApiResponse<VerificationResult>),
        (status = 400, description = "Neither identifier supplied", body = crate::errors::ErrorResponse),
        (status = 404, description = "No matching transaction", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway query failed", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<PaymentStatusRequest>,
) -> Result<Json<ApiResponse<VerificationResult>>, ServiceError> {
    let result = match (request.order_tracking_id, request.order_id) {
        (Some(tracking_id), _) => {
            state
                .services
                .reconciliation
                .verify_payment(&tracking_id)
                .await?
        }
        (None, Some(order_id)) => state.services.reconciliation.verify_order(order_id).await?,
        (None, None) => {
            return Err(ServiceError::BadRequest(
                "Provide orderTrackingId or orderId".to_string(),
            ))
        }
    };
    Ok(Json(ApiResponse::success(result)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/reconcile",
    responses(
        (status = 200, description = "Sweep finished", body = ApiResponse<SweepReport>),
    ),
    tag = "payments"
)]
pub async fn run_reconciliation(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SweepReport>>, ServiceError> {
    let report = state.services.reconciliation.run_sweep().await?;
    Ok(Json(ApiResponse::success(report)))
}
