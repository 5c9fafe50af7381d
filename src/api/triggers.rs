//! Parameterless stage triggers for an external scheduler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::AppState;
use crate::error::AppError;
use crate::sync::{CommissionRunSummary, LedgerSyncSummary, RateSamplingSummary};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsResponse {
    pub exchange_rates: RateSamplingSummary,
    pub commissions: CommissionRunSummary,
}

pub async fn sync_ledger(
    State(state): State<AppState>,
) -> Result<Json<LedgerSyncSummary>, AppError> {
    Ok(Json(state.pipeline.sync_ledger().await?))
}

pub async fn sample_rates(
    State(state): State<AppState>,
) -> Result<Json<RateSamplingSummary>, AppError> {
    Ok(Json(state.pipeline.sample_rates().await?))
}

pub async fn calculate_commissions(
    State(state): State<AppState>,
) -> Result<Json<CommissionsResponse>, AppError> {
    let (exchange_rates, commissions) = state.pipeline.calculate_commissions().await?;
    Ok(Json(CommissionsResponse {
        exchange_rates,
        commissions,
    }))
}
