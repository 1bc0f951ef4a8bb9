use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::orders::{
        OrderItemResponse, OrderListResponse, OrderResponse, UpdateDeliveryStatusRequest,
    },
    ApiResponse, AppState, ListQuery,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/items", get(get_order_items))
        .route("/orders/:id/delivery-status", put(update_delivery_status))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(
        ("page" = Option<u64>, Query, description = "Page number, 1-based"),
        ("limit" = Option<u64>, Query, description = "Items per page"),
    ),
    responses(
        (status = 200, description = "Orders listed", body = ApiResponse<OrderListResponse>),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders(query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/items",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order items listed", body = ApiResponse<Vec<OrderItemResponse>>),
    ),
    tag = "orders"
)]
pub async fn get_order_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<OrderItemResponse>>>, ServiceError> {
    let items = state.services.orders.get_order_items(id).await?;
    Ok(Json(ApiResponse::success(items)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/delivery-status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateDeliveryStatusRequest,
    responses(
        (status = 200, description = "Delivery status updated", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_delivery_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateDeliveryStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .update_delivery_status(id, request)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
