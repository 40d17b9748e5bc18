//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tokio_util::sync::CancellationToken;

use credit_ingest::api::{self, AppState};
use credit_ingest::handlers::{
    CreditPayload, CreditQueryHandler, IntegrateCreditsHandler, ProcessCreditHandler,
};
use credit_ingest::messaging::{BrokerCircuitBreaker, CreditConsumer, CreditPublisher, InMemoryBroker};
use credit_ingest::repository::InMemoryCreditRepository;

pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Scenario A: a consistent ISSQN credit
pub fn credit_json(number: &str) -> Value {
    json!({
        "numeroCredito": number,
        "numeroNfse": "7891011",
        "dataConstituicao": "2024-02-25",
        "valorIssqn": 1250,
        "tipoCredito": "ISSQN",
        "simplesNacional": "Sim",
        "aliquota": 5,
        "valorFaturado": 30000,
        "valorDeducao": 5000,
        "baseCalculo": 25000
    })
}

pub fn credit_payload(number: &str) -> CreditPayload {
    serde_json::from_value(credit_json(number)).unwrap()
}

/// In-memory broker and repository wired to a consumer and the HTTP router
pub struct Pipeline {
    pub broker: InMemoryBroker,
    pub repository: Arc<InMemoryCreditRepository>,
    pub consumer: Arc<CreditConsumer>,
    pub integrate: IntegrateCreditsHandler,
    pub app: Router,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_breaker(BrokerCircuitBreaker::default())
    }

    pub fn with_breaker(breaker: BrokerCircuitBreaker) -> Self {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(InMemoryCreditRepository::new());
        let publisher = CreditPublisher::new(Arc::new(broker.clone()));

        let consumer = Arc::new(CreditConsumer::new(
            Arc::new(broker.clone()),
            Arc::new(ProcessCreditHandler::new(repository.clone())),
            Arc::new(breaker),
            Duration::from_secs(5),
        ));

        let integrate = IntegrateCreditsHandler::new(publisher.clone());
        let state = AppState::new(
            integrate.clone(),
            CreditQueryHandler::new(repository.clone(), publisher, CancellationToken::new()),
        );

        Self {
            broker,
            repository,
            consumer,
            integrate,
            app: api::api_router(state),
        }
    }
}

/// Connect to the test database and clear the credit table
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    pool.execute(include_str!("../../migrations/0001_create_credito.sql"))
        .await
        .expect("Failed to apply migration");

    sqlx::query("TRUNCATE TABLE credito RESTART IDENTITY")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}
