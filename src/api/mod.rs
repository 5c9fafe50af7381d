pub mod health;
pub mod referrers;
pub mod triggers;

use crate::db::Repository;
use crate::orchestration::Pipeline;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, pipeline: Arc<Pipeline>) -> Self {
        Self { repo, pipeline }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/sync/ledger", post(triggers::sync_ledger))
        .route("/v1/sync/exchange-rates", post(triggers::sample_rates))
        .route("/v1/sync/commissions", post(triggers::calculate_commissions))
        .route("/v1/referrers/import", post(referrers::import_referrers))
        .route("/v1/referrers/export", post(referrers::export_referrers))
        .route("/v1/commissions", get(referrers::get_commissions))
        .layer(cors)
        .with_state(state)
}
