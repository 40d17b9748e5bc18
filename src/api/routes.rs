//! API Routes
//!
//! HTTP endpoint definitions.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::handlers::{
    CreditPayload, CreditQueryHandler, IntegrateCreditsCommand, IntegrateCreditsHandler,
    IntegrateCreditsResult,
};

/// Shared handler state for every route
#[derive(Clone)]
pub struct AppState {
    pub integrate: Arc<IntegrateCreditsHandler>,
    pub query: Arc<CreditQueryHandler>,
}

impl AppState {
    pub fn new(integrate: IntegrateCreditsHandler, query: CreditQueryHandler) -> Self {
        Self {
            integrate: Arc::new(integrate),
            query: Arc::new(query),
        }
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            "/creditos/integrar-credito-constituido",
            post(integrate_credits),
        )
        .route("/creditos/credito/:numero_credito", get(get_credit))
        .route("/creditos/:numero_nfse", get(list_credits_by_nfse))
}

/// Accept a batch of credits for asynchronous processing
async fn integrate_credits(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    body: Result<Json<Vec<CreditPayload>>, JsonRejection>,
) -> Result<(StatusCode, Json<IntegrateCreditsResult>), AppError> {
    let Json(credits) = body.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let result = state
        .integrate
        .execute(IntegrateCreditsCommand::new(credits), &context)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(result)))
}

async fn list_credits_by_nfse(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(numero_nfse): Path<String>,
) -> Result<Json<Vec<CreditPayload>>, AppError> {
    let credits = state
        .query
        .find_by_nfse_number(&numero_nfse, &context)
        .await?;
    Ok(Json(credits))
}

async fn get_credit(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(numero_credito): Path<String>,
) -> Result<Json<CreditPayload>, AppError> {
    let credit = state
        .query
        .find_by_credit_number(&numero_credito, &context)
        .await?;
    Ok(Json(credit))
}
