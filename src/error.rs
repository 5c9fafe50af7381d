use crate::db::RepoError;
use crate::orchestration::OrchestrationError;
use crate::referrers::ReferrersFileError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<OrchestrationError> for AppError {
    fn from(err: OrchestrationError) -> Self {
        match &err {
            OrchestrationError::AlreadyRunning(_) => AppError::Conflict(err.to_string()),
            OrchestrationError::Repo(RepoError::ImmutablePercentage { .. }) => {
                AppError::Conflict(err.to_string())
            }
            OrchestrationError::Referrers(
                ReferrersFileError::Invalid(_) | ReferrersFileError::Json { .. },
            ) => AppError::BadRequest(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        if status.is_server_error() {
            tracing::error!(error = %error_message, "Request failed");
        }

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::Stage;

    #[test]
    fn test_already_running_maps_to_conflict() {
        let err: AppError = OrchestrationError::AlreadyRunning(Stage::Commissions).into();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_invalid_referrers_file_maps_to_bad_request() {
        let err: AppError = OrchestrationError::Referrers(ReferrersFileError::Invalid(
            "duplicate referral code A".to_string(),
        ))
        .into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
