use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

mod config;
mod database;
mod dtos;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::AppConfig;
use database::connection::get_db_client;
use services::connectivity::{self, ConnectivitySignal};
use services::fx_service::FxConverter;
use services::gateway::airtel::AirtelGateway;
use services::gateway::card::CardGateway;
use services::gateway::mpesa::MpesaGateway;
use services::gateway::PaymentGateway;
use services::offline_ledger::{MongoOfflineLedger, OfflineLedger};
use services::orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use services::rail_registry::RailRegistry;
use services::transaction_store::{MongoTransactionStore, TransactionStore};
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let app_config = AppConfig::from_env();
    tracing::info!("📱 M-Pesa short code: {}", app_config.mpesa_short_code);
    tracing::info!("🌐 M-Pesa environment: {}", app_config.mpesa_environment);

    let db = get_db_client(&app_config).await;
    let app_state = initialize_app_state(db, app_config.clone()).await;

    spawn_background_tasks(&app_state, &app_config);

    let app = build_router(app_state);
    start_server(app, &app_config).await;
}

async fn initialize_app_state(db: mongodb::Database, config: AppConfig) -> AppState {
    let store = Arc::new(MongoTransactionStore::new(&db));
    if let Err(e) = store.ensure_indexes().await {
        tracing::warn!("Failed to create transaction indexes: {}", e);
    }

    let ledger = Arc::new(MongoOfflineLedger::new(&db));
    if let Err(e) = ledger.ensure_indexes().await {
        tracing::warn!("Failed to create offline queue indexes: {}", e);
    }

    let fx = Arc::new(FxConverter::new(
        reqwest::Client::new(),
        config.fx_source_url.clone(),
        config.fx_quote_ttl_secs,
    ));
    let rails = Arc::new(RailRegistry::with_default_rails());
    let connectivity = Arc::new(ConnectivitySignal::new(true));

    let gateways: Vec<Arc<dyn PaymentGateway>> = vec![
        Arc::new(MpesaGateway::new(config.clone())),
        Arc::new(AirtelGateway::new(config.clone())),
        Arc::new(CardGateway::new(config.clone())),
    ];
    tracing::info!("✅ {} settlement rails wired", gateways.len());

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateways,
        store.clone() as Arc<dyn TransactionStore>,
        ledger as Arc<dyn OfflineLedger>,
        fx.clone(),
        rails.clone(),
        connectivity.subscribe(),
        OrchestratorConfig {
            settle_timeout: Duration::from_secs(config.settle_timeout_secs),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        },
    ));

    AppState {
        db,
        orchestrator,
        store: store as Arc<dyn TransactionStore>,
        fx,
        rails,
        connectivity,
    }
}

fn spawn_background_tasks(app_state: &AppState, config: &AppConfig) {
    tokio::spawn(connectivity::probe_loop(
        app_state.connectivity.clone(),
        reqwest::Client::new(),
        config.probe_url.clone(),
        Duration::from_secs(config.probe_interval_secs),
    ));

    tokio::spawn(drain_on_reconnect(
        app_state.connectivity.subscribe(),
        app_state.orchestrator.clone(),
    ));

    // Pick up anything left queued by a previous run.
    let orchestrator = app_state.orchestrator.clone();
    tokio::spawn(async move {
        match orchestrator.drain().await {
            Ok(report) if !report.skipped => {
                tracing::info!(
                    "Startup drain: {} completed, {} failed, {} deferred",
                    report.completed,
                    report.failed,
                    report.deferred
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Startup drain failed: {}", e),
        }
    });
}

async fn drain_on_reconnect(
    mut connectivity: watch::Receiver<bool>,
    orchestrator: Arc<PaymentOrchestrator>,
) {
    let mut was_online = *connectivity.borrow();
    while connectivity.changed().await.is_ok() {
        let online = *connectivity.borrow();
        if online && !was_online {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.drain().await {
                    tracing::error!("Drain failed: {}", e);
                }
            });
        }
        was_online = online;
    }
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/api/payments", routes::payments::payment_routes())
        .nest("/api/gateway", routes::payments::gateway_routes())
        .nest("/api/merchants", routes::merchants::merchant_routes())
        .nest("/api", routes::wallet::wallet_routes())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, config: &AppConfig) {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("🚀 Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            axum::serve(listener, app).await.unwrap();
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "🌍 FotiPay Travel Payments API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    use mongodb::bson::doc;

    let db_status = match state.db.run_command(doc! {"ping": 1}).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "online": state.connectivity.is_online(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
