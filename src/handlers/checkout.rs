use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};

use crate::{
    errors::ServiceError,
    services::checkout::{CheckoutRequest, CheckoutResponse},
    ApiResponse, AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/checkout", post(initiate_checkout))
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Checkout initiated; redirect the customer to the returned payment URL", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Invalid cart", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "checkout"
)]
pub async fn initiate_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    let response = state.services.checkout.initiate_checkout(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            response,
            "Redirect the customer to the payment page",
        )),
    ))
}
