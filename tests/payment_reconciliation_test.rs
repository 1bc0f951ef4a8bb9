mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{read_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::json;
use uuid::Uuid;

use aquamart_api::entities::{callback_log, gateway_transaction, order};
use aquamart_api::models::{GatewayStatus, PaymentStatus};

async fn product_stock(app: &TestApp, product_id: Uuid) -> i32 {
    app.state
        .services
        .products
        .get_product(product_id)
        .await
        .expect("product missing")
        .stock_quantity
}

async fn find_order(app: &TestApp, merchant_reference: &str) -> Option<order::Model> {
    order::Entity::find()
        .filter(order::Column::OrderNumber.eq(merchant_reference))
        .one(&*app.state.db)
        .await
        .expect("order query failed")
}

#[tokio::test]
async fn concurrent_verifications_complete_order_and_deduct_stock_once() {
    let app = TestApp::new().await;
    let tilapia = app.seed_product("Tilapia fingerlings", "FISH-001", dec!(25.00), 10).await;
    let feed = app.seed_product("Starter feed 5kg", "FEED-001", dec!(1800.00), 5).await;

    let checkout = app
        .checkout(Uuid::new_v4(), &[(tilapia, 3), (feed, 1)])
        .await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap().to_string();
    let reference = checkout["merchant_reference"].as_str().unwrap().to_string();

    app.gateway.set_status(&tracking_id, 1, "COMPLETED");

    let mut handles = Vec::new();
    for _ in 0..5 {
        let router = app.router.clone();
        let tracking_id = tracking_id.clone();
        handles.push(tokio::spawn(async move {
            use tower::ServiceExt;
            let request = axum::http::Request::builder()
                .method(Method::POST)
                .uri("/api/v1/payments/status")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    json!({"orderTrackingId": tracking_id}).to_string(),
                ))
                .unwrap();
            router.oneshot(request).await.unwrap().status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    // One completion, one deduction, no matter how many verifications raced.
    assert_eq!(product_stock(&app, tilapia).await, 7);
    assert_eq!(product_stock(&app, feed).await, 4);

    let order = find_order(&app, &reference).await.expect("order not materialized");
    assert_eq!(order.payment_status, PaymentStatus::Completed);
}

#[tokio::test]
async fn duplicate_callbacks_are_idempotent() {
    let app = TestApp::new().await;
    let product = app.seed_product("Pond liner", "POND-001", dec!(4500.00), 8).await;

    let checkout = app.checkout(Uuid::new_v4(), &[(product, 2)]).await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap();
    let reference = checkout["merchant_reference"].as_str().unwrap();

    let body = format!(
        "OrderTrackingId={}&OrderMerchantReference={}&OrderNotificationType=COMPLETED",
        tracking_id, reference
    );
    for _ in 0..2 {
        let response = app.post_form("/api/v1/payments/callback", &body).await;
        let (status, payload) = read_json(response).await;
        assert_eq!(status, StatusCode::OK, "callback rejected: {}", payload);
        assert_eq!(payload["success"], json!(true));
        assert!(payload["orderId"].is_string());
    }

    assert_eq!(product_stock(&app, product).await, 6);

    let logs = callback_log::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|log| log.processed));
}

#[tokio::test]
async fn stale_failure_never_regresses_a_completed_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Aerator pump", "PUMP-001", dec!(9800.00), 4).await;

    let checkout = app.checkout(Uuid::new_v4(), &[(product, 1)]).await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap();
    let reference = checkout["merchant_reference"].as_str().unwrap();

    let completed = format!(
        "OrderTrackingId={}&OrderNotificationType=COMPLETED",
        tracking_id
    );
    let response = app.post_form("/api/v1/payments/callback", &completed).await;
    assert_eq!(response.status(), StatusCode::OK);

    // A late FAILED redelivery arrives after the money moved.
    let failed = format!(
        "OrderTrackingId={}&OrderNotificationType=FAILED",
        tracking_id
    );
    let response = app.post_form("/api/v1/payments/callback", &failed).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = find_order(&app, reference).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(product_stock(&app, product).await, 3);

    let transaction = gateway_transaction::Entity::find()
        .filter(gateway_transaction::Column::TrackingId.eq(tracking_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, GatewayStatus::Completed);
}

#[tokio::test]
async fn refund_is_honored_after_completion() {
    let app = TestApp::new().await;
    let product = app.seed_product("Water test kit", "TEST-001", dec!(1200.00), 6).await;

    let checkout = app.checkout(Uuid::new_v4(), &[(product, 1)]).await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap().to_string();
    let reference = checkout["merchant_reference"].as_str().unwrap().to_string();

    app.gateway.set_status(&tracking_id, 1, "COMPLETED");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/status",
            Some(json!({"orderTrackingId": tracking_id})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    app.gateway.set_status(&tracking_id, 3, "Reversed");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/status",
            Some(json!({"orderTrackingId": tracking_id})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = find_order(&app, &reference).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn duplicate_completion_after_refund_deducts_nothing() {
    let app = TestApp::new().await;
    let product = app.seed_product("Fish net 10m", "NET-001", dec!(2500.00), 10).await;

    let checkout = app.checkout(Uuid::new_v4(), &[(product, 3)]).await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap().to_string();
    let reference = checkout["merchant_reference"].as_str().unwrap().to_string();

    let completed = format!(
        "OrderTrackingId={}&OrderNotificationType=COMPLETED",
        tracking_id
    );
    let response = app.post_form("/api/v1/payments/callback", &completed).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(product_stock(&app, product).await, 7);

    app.gateway.set_status(&tracking_id, 3, "Reversed");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/status",
            Some(json!({"orderTrackingId": tracking_id})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        find_order(&app, &reference).await.unwrap().payment_status,
        PaymentStatus::Refunded
    );

    // The gateway redelivers the old COMPLETED notification after the refund.
    let response = app.post_form("/api/v1/payments/callback", &completed).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = find_order(&app, &reference).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(product_stock(&app, product).await, 7);

    let transaction = gateway_transaction::Entity::find()
        .filter(gateway_transaction::Column::TrackingId.eq(tracking_id.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, GatewayStatus::Refunded);
}

#[tokio::test]
async fn unresolvable_callback_returns_404_and_leaves_unprocessed_log() {
    let app = TestApp::new().await;

    let response = app
        .post_form(
            "/api/v1/payments/callback",
            "OrderTrackingId=TRK-GHOST&OrderNotificationType=COMPLETED",
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let logs = callback_log::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].processed);
    assert!(logs[0].error.is_some());
    assert_eq!(logs[0].tracking_id.as_deref(), Some("TRK-GHOST"));
}

#[tokio::test]
async fn callback_without_identifiers_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .post_form("/api/v1/payments/callback", "OrderNotificationType=IPNCHANGE")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ambiguous_notification_is_verified_against_the_gateway() {
    let app = TestApp::new().await;
    let product = app.seed_product("Fish net", "NET-001", dec!(650.00), 10).await;

    let checkout = app.checkout(Uuid::new_v4(), &[(product, 2)]).await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap().to_string();
    let reference = checkout["merchant_reference"].as_str().unwrap().to_string();

    // IPNCHANGE says nothing about the outcome; the gateway does.
    app.gateway.set_status(&tracking_id, 1, "COMPLETED");
    let body = format!(
        "OrderTrackingId={}&OrderNotificationType=IPNCHANGE",
        tracking_id
    );
    let response = app.post_form("/api/v1/payments/callback", &body).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = find_order(&app, &reference).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(product_stock(&app, product).await, 8);
}

#[tokio::test]
async fn cancel_description_overrides_status_code() {
    let app = TestApp::new().await;
    let product = app.seed_product("Heater 300W", "HEAT-001", dec!(2100.00), 5).await;

    let checkout = app.checkout(Uuid::new_v4(), &[(product, 1)]).await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap().to_string();

    app.gateway.set_status(&tracking_id, 2, "Cancelled by payer");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/status",
            Some(json!({"orderTrackingId": tracking_id})),
        )
        .await;
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("CANCELLED"));

    // No order existed yet, so none is materialized for a dead payment.
    assert_eq!(product_stock(&app, product).await, 5);
}

#[tokio::test]
async fn sweep_repairs_interrupted_completion() {
    let app = TestApp::new().await;
    let product = app.seed_product("Breeding tank", "TANK-001", dec!(15000.00), 3).await;

    let checkout = app.checkout(Uuid::new_v4(), &[(product, 1)]).await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap().to_string();
    let reference = checkout["merchant_reference"].as_str().unwrap().to_string();

    // Simulate a crash after the gateway confirmed but before the completion
    // transition ran: the stored transaction says COMPLETED, no order exists.
    let transaction = gateway_transaction::Entity::find()
        .filter(gateway_transaction::Column::TrackingId.eq(tracking_id.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: gateway_transaction::ActiveModel = transaction.into();
    active.status = Set(GatewayStatus::Completed);
    active.update(&*app.state.db).await.unwrap();
    assert!(find_order(&app, &reference).await.is_none());

    let response = app
        .request(Method::POST, "/api/v1/payments/reconcile", None)
        .await;
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fixed"].as_array().unwrap().len(), 1);

    let order = find_order(&app, &reference).await.expect("sweep did not materialize order");
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(product_stock(&app, product).await, 2);
}

#[tokio::test]
async fn sweep_reverifies_aged_pending_transactions() {
    let app = TestApp::new().await;
    let product = app.seed_product("pH buffer", "CHEM-001", dec!(480.00), 12).await;

    let checkout = app.checkout(Uuid::new_v4(), &[(product, 4)]).await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap().to_string();
    let reference = checkout["merchant_reference"].as_str().unwrap().to_string();

    // The callback never arrived; the gateway knows the customer paid.
    app.gateway.set_status(&tracking_id, 1, "COMPLETED");

    let transaction = gateway_transaction::Entity::find()
        .filter(gateway_transaction::Column::TrackingId.eq(tracking_id.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: gateway_transaction::ActiveModel = transaction.into();
    active.created_at = Set(Utc::now() - Duration::hours(1));
    active.update(&*app.state.db).await.unwrap();

    let response = app
        .request(Method::POST, "/api/v1/payments/reconcile", None)
        .await;
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fixed"].as_array().unwrap().len(), 1);

    let order = find_order(&app, &reference).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(product_stock(&app, product).await, 8);
}

#[tokio::test]
async fn sweep_isolates_per_transaction_failures() {
    let app = TestApp::new().await;
    let product = app.seed_product("Juvenile catfish", "FISH-002", dec!(40.00), 50).await;

    let healthy = app.checkout(Uuid::new_v4(), &[(product, 5)]).await;
    let broken = app.checkout(Uuid::new_v4(), &[(product, 5)]).await;
    let healthy_id = healthy["tracking_id"].as_str().unwrap().to_string();
    let broken_id = broken["tracking_id"].as_str().unwrap().to_string();

    app.gateway.set_status(&healthy_id, 1, "COMPLETED");
    app.gateway.set_query_error(&broken_id, "gateway timed out");

    for tracking_id in [&healthy_id, &broken_id] {
        let transaction = gateway_transaction::Entity::find()
            .filter(gateway_transaction::Column::TrackingId.eq(tracking_id.as_str()))
            .one(&*app.state.db)
            .await
            .unwrap()
            .unwrap();
        let mut active: gateway_transaction::ActiveModel = transaction.into();
        active.created_at = Set(Utc::now() - Duration::hours(1));
        active.update(&*app.state.db).await.unwrap();
    }

    let response = app
        .request(Method::POST, "/api/v1/payments/reconcile", None)
        .await;
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fixed"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["errors"].as_array().unwrap().len(), 1);

    // The healthy order settled despite its broken neighbor.
    let reference = healthy["merchant_reference"].as_str().unwrap();
    let order = find_order(&app, reference).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(product_stock(&app, product).await, 45);
}

#[tokio::test]
async fn stock_deduction_floors_at_zero() {
    let app = TestApp::new().await;
    let product = app.seed_product("Show guppy pair", "FISH-003", dec!(900.00), 3).await;

    // Both carts pass the advisory stock check, but together they oversell.
    let first = app.checkout(Uuid::new_v4(), &[(product, 2)]).await;
    let second = app.checkout(Uuid::new_v4(), &[(product, 2)]).await;

    for checkout in [&first, &second] {
        let tracking_id = checkout["tracking_id"].as_str().unwrap().to_string();
        app.gateway.set_status(&tracking_id, 1, "COMPLETED");
        let response = app
            .request(
                Method::POST,
                "/api/v1/payments/status",
                Some(json!({"orderTrackingId": tracking_id})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(product_stock(&app, product).await, 0);
}

#[tokio::test]
async fn verify_by_order_id_resolves_through_the_transaction() {
    let app = TestApp::new().await;
    let product = app.seed_product("Filter sponge", "FILT-001", dec!(300.00), 9).await;

    let checkout = app.checkout(Uuid::new_v4(), &[(product, 1)]).await;
    let tracking_id = checkout["tracking_id"].as_str().unwrap().to_string();
    let reference = checkout["merchant_reference"].as_str().unwrap().to_string();

    app.gateway.set_status(&tracking_id, 1, "COMPLETED");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/status",
            Some(json!({"orderTrackingId": tracking_id})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = find_order(&app, &reference).await.unwrap();
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/status",
            Some(json!({"orderId": order.id})),
        )
        .await;
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("COMPLETED"));
    assert_eq!(body["data"]["orderId"], json!(order.id));
    assert_eq!(body["data"]["paymentStatus"], json!("completed"));
}
