use anyhow::Context;
use referral_ledger::datasource::{StarknetVaultReader, VaultReader};
use referral_ledger::orchestration::Pipeline;
use referral_ledger::{api, config::Config, db::init_db, Repository};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_path))?;

    let repo = Arc::new(Repository::new(pool));
    let reader: Arc<dyn VaultReader> = Arc::new(
        StarknetVaultReader::new(config.rpc_url.clone(), config.vault_address.clone())
            .with_retry_window(config.rpc_retry_window),
    );
    tracing::info!(
        network = %config.network,
        vault = %config.vault_address,
        protocol_bps = config.protocol_commission_bps,
        "Vault reader configured"
    );

    let pipeline = Arc::new(Pipeline::new(repo.clone(), reader, config));
    let app = api::create_router(api::AppState::new(repo, pipeline));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
