use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{handlers, models, services};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AquaMart API",
        version = "0.1.0",
        description = r#"
Storefront and back-office API for an aquaculture goods business.

Orders are initiated at checkout and settled asynchronously: the payment
gateway reports outcomes through IPN callbacks, active status polling, and a
periodic reconciliation sweep. Order rows only exist for payments the gateway
has resolved; stock is deducted exactly once per completed order.
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    paths(
        handlers::checkout::initiate_checkout,
        handlers::payment_callbacks::callback_get,
        handlers::payment_callbacks::callback_post,
        handlers::payment_status::verify_payment,
        handlers::payment_status::run_reconciliation,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::get_order_items,
        handlers::orders::update_delivery_status,
        handlers::products::create_product,
        handlers::products::list_products,
        handlers::products::get_product,
        handlers::products::update_product,
        handlers::products::adjust_stock,
    ),
    components(schemas(
        models::PaymentStatus,
        models::DeliveryStatus,
        models::GatewayStatus,
        services::checkout::CheckoutRequest,
        services::checkout::CheckoutItemRequest,
        services::checkout::CheckoutResponse,
        services::orders::OrderResponse,
        services::orders::OrderItemResponse,
        services::orders::OrderListResponse,
        services::orders::UpdateDeliveryStatusRequest,
        services::products::CreateProductRequest,
        services::products::UpdateProductRequest,
        services::products::AdjustStockRequest,
        services::products::ProductResponse,
        services::products::ProductListResponse,
        services::reconciliation::VerificationResult,
        services::reconciliation::SweepReport,
        services::reconciliation::SweepError,
        handlers::payment_callbacks::CallbackResponse,
        handlers::payment_status::PaymentStatusRequest,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "checkout", description = "Order initiation"),
        (name = "payments", description = "Gateway callbacks, status verification, reconciliation"),
        (name = "orders", description = "Order reads and delivery updates"),
        (name = "products", description = "Catalog and stock management"),
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`, serving the spec at `/api-docs/openapi.json`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
