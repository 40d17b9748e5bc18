//! credit_ingest - constituted ISSQN credit ingestion service
//!
//! Accepts credit batches over HTTP, publishes them to NATS JetStream and
//! persists them to PostgreSQL from a background consumer.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_ingest::api::{self, AppState};
use credit_ingest::config::{Config, LogFormat};
use credit_ingest::db;
use credit_ingest::handlers::{CreditQueryHandler, IntegrateCreditsHandler, ProcessCreditHandler};
use credit_ingest::messaging::{BrokerCircuitBreaker, CreditConsumer, CreditPublisher, NatsBroker};
use credit_ingest::repository::{CreditRepository, PgCreditRepository};
use credit_ingest::worker::CreditProcessorService;

/// Initialize tracing/logging
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "credit_ingest=debug,tower_http=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api", api::api_router(state))
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // LOG_FORMAT is read before the rest so config errors are logged in the right format
    let log_format = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    };
    init_tracing(log_format);

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting credit_ingest");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!("Database connected successfully");

    let broker = Arc::new(NatsBroker::connect(config.broker.clone()).await?);
    let repository: Arc<dyn CreditRepository> = Arc::new(PgCreditRepository::new(pool.clone()));
    let publisher = CreditPublisher::new(broker.clone());
    let shutdown = CancellationToken::new();

    let consumer = Arc::new(CreditConsumer::new(
        broker.clone(),
        Arc::new(ProcessCreditHandler::new(repository.clone())),
        Arc::new(BrokerCircuitBreaker::new(
            config.breaker.failure_threshold,
            config.breaker.open_duration,
        )),
        config.consumer.shutdown_timeout,
    ));

    let processor = if config.consumer.enabled {
        Some(
            CreditProcessorService::new(consumer, config.consumer.clone())
                .start(shutdown.child_token()),
        )
    } else {
        tracing::warn!("Credit processor disabled by configuration");
        None
    };

    let state = AppState::new(
        IntegrateCreditsHandler::new(publisher.clone()),
        CreditQueryHandler::new(repository, publisher, shutdown.child_token()),
    );
    let app = build_router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    shutdown.cancel();

    if let Some(processor) = processor {
        if let Err(e) = processor.await {
            tracing::error!(error = %e, "Credit processor task failed");
        }
    }

    if let Err(e) = broker.flush().await {
        tracing::warn!(error = %e, "Failed to flush broker connection");
    }
    pool.close().await;
    tracing::info!("Connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
