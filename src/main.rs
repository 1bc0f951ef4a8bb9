use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use aquamart_api as api;
use api::services::{
    checkout::CheckoutService, orders::OrderService, payments::PaymentService,
    products::ProductService, reconciliation::ReconciliationService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);
    let config = Arc::new(cfg);

    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    let gateway: Arc<dyn api::pesapal::PaymentGateway> =
        Arc::new(api::pesapal::PesapalClient::new(config.gateway.clone())?);

    let payments = PaymentService::new(db_arc.clone(), event_sender.clone());
    let reconciliation = ReconciliationService::new(
        db_arc.clone(),
        gateway.clone(),
        payments.clone(),
        config.clone(),
        event_sender.clone(),
    );
    let services = api::AppServices {
        products: ProductService::new(db_arc.clone()),
        orders: OrderService::new(db_arc.clone()),
        checkout: CheckoutService::new(
            db_arc.clone(),
            gateway.clone(),
            config.clone(),
            event_sender.clone(),
        ),
        payments,
        reconciliation: reconciliation.clone(),
    };

    let app_state = api::AppState {
        db: db_arc.clone(),
        config: config.clone(),
        event_sender,
        services,
    };

    // Scheduled reconciliation sweep. The same logic stays reachable over
    // POST /api/v1/payments/reconcile when the interval is disabled.
    if config.sweep_interval_secs > 0 {
        let sweeper = reconciliation.clone();
        let interval_secs = config.sweep_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            // First tick fires immediately; skip it so startup stays quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = sweeper.run_sweep().await {
                    error!("Reconciliation sweep failed: {}", err);
                }
            }
        });
    }

    let configured_origins: Option<Vec<HeaderValue>> = config
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if config.is_development() {
        info!("Using permissive CORS (development environment)");
        CorsLayer::permissive()
    } else {
        error!("Missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS");
        return Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS".into());
    };

    let app = api::app_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("aquamart-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
