pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod pesapal;
pub mod services;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::services::{
    checkout::CheckoutService, orders::OrderService, payments::PaymentService,
    products::ProductService, reconciliation::ReconciliationService,
};

/// Common query parameters for list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

/// Uniform response envelope for every JSON endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            errors: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// The service layer, constructed once at startup and cloned into handlers.
#[derive(Clone)]
pub struct AppServices {
    pub products: ProductService,
    pub orders: OrderService,
    pub checkout: CheckoutService,
    pub payments: PaymentService,
    pub reconciliation: ReconciliationService,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub services: AppServices,
}

/// Builds the `/api/v1` router plus the service endpoints.
pub fn app_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .merge(handlers::checkout::routes())
        .merge(handlers::payment_callbacks::routes())
        .merge(handlers::payment_status::routes())
        .merge(handlers::orders::routes())
        .merge(handlers::products::routes());

    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1)
        .merge(openapi::swagger_ui())
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Liveness plus a database ping.
async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, ServiceError> {
    state.db.ping().await?;
    Ok(Json(json!({
        "status": "healthy",
        "database": "up",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
