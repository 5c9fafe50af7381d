use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::db::UpsertSummary;
use crate::domain::ReferralCode;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsQuery {
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsResponse {
    pub total_commission: String,
    pub commissions: Vec<CommissionDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionDto {
    pub id: Option<i64>,
    pub referral_code: String,
    pub commission_amount: String,
    pub is_paid: bool,
    pub ledger_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub exported: usize,
}

pub async fn import_referrers(
    State(state): State<AppState>,
) -> Result<Json<UpsertSummary>, AppError> {
    Ok(Json(state.pipeline.import_referrers().await?))
}

pub async fn export_referrers(
    State(state): State<AppState>,
) -> Result<Json<ExportResponse>, AppError> {
    let exported = state.pipeline.export_referrers().await?;
    Ok(Json(ExportResponse { exported }))
}

pub async fn get_commissions(
    Query(params): Query<CommissionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<CommissionsResponse>, AppError> {
    let code = match params.referral_code.as_deref() {
        Some(raw) => Some(
            ReferralCode::new(raw)
                .ok_or_else(|| AppError::BadRequest("referralCode must not be blank".into()))?,
        ),
        None => None,
    };
    if let Some(code) = &code {
        if state.repo.get_referrer(code).await?.is_none() {
            return Err(AppError::NotFound(format!("unknown referral code {}", code)));
        }
    }

    let rows = state.repo.commissions_for(code.as_ref()).await?;

    let mut total = crate::domain::Decimal::zero();
    for row in &rows {
        total = total.checked_add(row.commission_amount).ok_or_else(|| {
            AppError::Internal("commission total overflows".into())
        })?;
    }

    let commissions = rows
        .into_iter()
        .map(|c| CommissionDto {
            id: c.id,
            referral_code: c.referral_code.as_str().to_string(),
            commission_amount: c.commission_amount.to_canonical_string(),
            is_paid: c.is_paid,
            ledger_id: c.ledger_id,
        })
        .collect();

    Ok(Json(CommissionsResponse {
        total_commission: total.to_canonical_string(),
        commissions,
    }))
}
