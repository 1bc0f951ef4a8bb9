use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use aquamart_api::{
    config::AppConfig,
    db,
    errors::ServiceError,
    events::{self, EventSender},
    pesapal::{PaymentGateway, SubmitOrderRequest, SubmitOrderResponse, TransactionStatus},
    services::{
        checkout::CheckoutService, orders::OrderService, payments::PaymentService,
        products::ProductService, reconciliation::ReconciliationService,
    },
    AppServices, AppState,
};

/// Scripted stand-in for the payment gateway. Checkout submissions hand out
/// sequential tracking ids; status queries answer from a script set by the
/// test, defaulting to a pending report.
pub struct MockGateway {
    scripts: Mutex<HashMap<String, Script>>,
    references: Mutex<HashMap<String, String>>,
    submit_counter: AtomicU64,
}

enum Script {
    Status { code: i64, description: String },
    QueryError(String),
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            references: Mutex::new(HashMap::new()),
            submit_counter: AtomicU64::new(0),
        })
    }

    /// Script the status the gateway reports for a tracking id.
    pub fn set_status(&self, tracking_id: &str, code: i64, description: &str) {
        self.scripts.lock().unwrap().insert(
            tracking_id.to_string(),
            Script::Status {
                code,
                description: description.to_string(),
            },
        );
    }

    /// Make status queries for a tracking id fail.
    pub fn set_query_error(&self, tracking_id: &str, message: &str) {
        self.scripts.lock().unwrap().insert(
            tracking_id.to_string(),
            Script::QueryError(message.to_string()),
        );
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn authenticate(&self) -> Result<String, ServiceError> {
        Ok("test-token".to_string())
    }

    async fn submit_order(
        &self,
        request: &SubmitOrderRequest,
    ) -> Result<SubmitOrderResponse, ServiceError> {
        let n = self.submit_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let tracking_id = format!("TRK-{:04}", n);
        self.references
            .lock()
            .unwrap()
            .insert(tracking_id.clone(), request.id.clone());
        Ok(SubmitOrderResponse {
            order_tracking_id: tracking_id.clone(),
            redirect_url: format!("https://gateway.test/pay/{}", tracking_id),
        })
    }

    async fn query_status(&self, tracking_id: &str) -> Result<TransactionStatus, ServiceError> {
        let merchant_reference = self
            .references
            .lock()
            .unwrap()
            .get(tracking_id)
            .cloned()
            .unwrap_or_default();
        match self.scripts.lock().unwrap().get(tracking_id) {
            Some(Script::Status { code, description }) => Ok(TransactionStatus {
                status_code: *code,
                payment_status_description: description.clone(),
                merchant_reference,
                amount: Decimal::ZERO,
                currency: "KES".to_string(),
                payment_method: None,
                confirmation_code: None,
            }),
            Some(Script::QueryError(message)) => {
                Err(ServiceError::GatewayQueryError(message.clone()))
            }
            None => Ok(TransactionStatus {
                status_code: 0,
                payment_status_description: "PENDING".to_string(),
                merchant_reference,
                amount: Decimal::ZERO,
                currency: "KES".to_string(),
                payment_method: None,
                confirmation_code: None,
            }),
        }
    }
}

/// Application harness backed by a file-based SQLite database.
///
/// SQLite in-memory databases are per-connection, so the pool is capped at one
/// connection against a throwaway file instead.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = db_dir.path().join("aquamart_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.delivery_fee = Decimal::ZERO;
        cfg.sweep_interval_secs = 0;
        cfg.sweep_pending_min_age_secs = 0;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let config = Arc::new(cfg);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = MockGateway::new();
        let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();

        let payments = PaymentService::new(db_arc.clone(), event_sender.clone());
        let services = AppServices {
            products: ProductService::new(db_arc.clone()),
            orders: OrderService::new(db_arc.clone()),
            checkout: CheckoutService::new(
                db_arc.clone(),
                gateway_dyn.clone(),
                config.clone(),
                event_sender.clone(),
            ),
            payments: payments.clone(),
            reconciliation: ReconciliationService::new(
                db_arc.clone(),
                gateway_dyn,
                payments,
                config.clone(),
                event_sender.clone(),
            ),
        };

        let state = AppState {
            db: db_arc,
            config,
            event_sender,
            services,
        };
        let router = aquamart_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Send a JSON (or empty-bodied) request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize request body"))
        } else {
            Body::empty()
        };
        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send a form-encoded POST, the gateway's default IPN transport.
    pub async fn post_form(&self, uri: &str, body: &str) -> axum::response::Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Seed a catalog product directly through the service layer.
    pub async fn seed_product(&self, name: &str, sku: &str, price: Decimal, stock: i32) -> Uuid {
        let product = self
            .state
            .services
            .products
            .create_product(aquamart_api::services::products::CreateProductRequest {
                name: name.to_string(),
                description: None,
                sku: sku.to_string(),
                price,
                stock_quantity: stock,
            })
            .await
            .expect("failed to seed product");
        product.id
    }

    /// Run a checkout over HTTP and return the response `data` object.
    pub async fn checkout(&self, customer_id: Uuid, items: &[(Uuid, i32)]) -> Value {
        let items: Vec<Value> = items
            .iter()
            .map(|(product_id, quantity)| {
                serde_json::json!({"product_id": product_id, "quantity": quantity})
            })
            .collect();
        let response = self
            .request(
                Method::POST,
                "/api/v1/checkout",
                Some(serde_json::json!({
                    "customer_id": customer_id,
                    "items": items,
                    "email": "fishkeeper@example.com",
                    "phone_number": "+254700000000",
                    "delivery_address": "12 Lakeview Rd, Kisumu",
                })),
            )
            .await;
        let (status, body) = read_json(response).await;
        assert_eq!(status, StatusCode::CREATED, "checkout failed: {}", body);
        body["data"].clone()
    }
}

/// Collect a response into its status code and parsed JSON body.
pub async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body was not JSON")
    };
    (status, value)
}
