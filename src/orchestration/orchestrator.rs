use crate::config::Config;
use crate::datasource::VaultReader;
use crate::db::{RepoError, Repository, UpsertSummary};
use crate::referrers::{load_referrers_file, save_referrers_file, ReferrersFileError};
use crate::sync::{
    CommissionRun, CommissionRunSummary, LedgerSync, LedgerSyncSummary, RateSampler,
    RateSamplingSummary, SyncError,
};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Pipeline stage names, used for run locks and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LedgerSync,
    ExchangeRates,
    Commissions,
    Referrers,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::LedgerSync => "ledger_sync",
            Stage::ExchangeRates => "exchange_rates",
            Stage::Commissions => "commissions",
            Stage::Referrers => "referrers",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct StageLocks {
    ledger: Mutex<()>,
    rates: Mutex<()>,
    commissions: Mutex<()>,
    referrers: Mutex<()>,
}

/// Summary of a full ledger -> rates -> commissions pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub ledger: LedgerSyncSummary,
    pub exchange_rates: RateSamplingSummary,
    pub commissions: CommissionRunSummary,
}

/// Coordinates the pipeline stages over shared handles.
///
/// Each stage runs at most once at a time; a second invocation while one is
/// in flight fails fast with `AlreadyRunning`.
#[derive(Clone)]
pub struct Pipeline {
    repo: Arc<Repository>,
    reader: Arc<dyn VaultReader>,
    config: Config,
    locks: Arc<StageLocks>,
}

impl Pipeline {
    pub fn new(repo: Arc<Repository>, reader: Arc<dyn VaultReader>, config: Config) -> Self {
        Self {
            repo,
            reader,
            config,
            locks: Arc::new(StageLocks::default()),
        }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Turn raw events after the checkpoints into ledger rows.
    pub async fn sync_ledger(&self) -> Result<LedgerSyncSummary, OrchestrationError> {
        let _guard = acquire(&self.locks.ledger, Stage::LedgerSync)?;
        let run_id = Uuid::new_v4();
        let summary = LedgerSync::new(&self.repo)
            .run()
            .instrument(info_span!("ledger_sync", %run_id))
            .await?;
        Ok(summary)
    }

    /// Sample exchange rates for ledger blocks not sampled yet.
    pub async fn sample_rates(&self) -> Result<RateSamplingSummary, OrchestrationError> {
        let _guard = acquire(&self.locks.rates, Stage::ExchangeRates)?;
        let run_id = Uuid::new_v4();
        let summary = RateSampler::new(&self.repo, self.reader.as_ref(), self.config.rate_sampling)
            .run()
            .instrument(info_span!("exchange_rates", %run_id))
            .await?;
        Ok(summary)
    }

    /// Compute commissions for every referrer.
    ///
    /// Rates are sampled first so every ledger block has a rate.
    pub async fn calculate_commissions(
        &self,
    ) -> Result<(RateSamplingSummary, CommissionRunSummary), OrchestrationError> {
        let _guard = acquire(&self.locks.commissions, Stage::Commissions)?;
        let rates = self.sample_rates().await?;
        let commissions = self.commissions_only().await?;
        Ok((rates, commissions))
    }

    async fn commissions_only(&self) -> Result<CommissionRunSummary, OrchestrationError> {
        let run_id = Uuid::new_v4();
        let summary = CommissionRun::new(&self.repo, self.config.protocol_commission_bps)
            .run()
            .instrument(info_span!("commissions", %run_id))
            .await?;
        Ok(summary)
    }

    /// Ledger sync, then rate sampling, then commissions.
    pub async fn run_all(&self) -> Result<PipelineSummary, OrchestrationError> {
        let run_id = Uuid::new_v4();
        async {
            info!("Starting full pipeline run");
            let ledger = self.sync_ledger().await?;
            let _guard = acquire(&self.locks.commissions, Stage::Commissions)?;
            let exchange_rates = self.sample_rates().await?;
            let commissions = self.commissions_only().await?;
            Ok::<_, OrchestrationError>(PipelineSummary {
                run_id,
                ledger,
                exchange_rates,
                commissions,
            })
        }
        .instrument(info_span!("pipeline", %run_id))
        .await
    }

    /// Upsert the referrers file into the database.
    pub async fn import_referrers(&self) -> Result<UpsertSummary, OrchestrationError> {
        let _guard = acquire(&self.locks.referrers, Stage::Referrers)?;
        let path = Path::new(&self.config.referrers_file);
        let referrers = load_referrers_file(path).await?;
        info!(path = %path.display(), count = referrers.len(), "Importing referrers");
        Ok(self.repo.upsert_referrers(&referrers).await?)
    }

    /// Write the database referrers back to the referrers file.
    pub async fn export_referrers(&self) -> Result<usize, OrchestrationError> {
        let _guard = acquire(&self.locks.referrers, Stage::Referrers)?;
        let path = Path::new(&self.config.referrers_file);
        let referrers = self.repo.list_referrers().await?;
        save_referrers_file(path, &referrers).await?;
        info!(path = %path.display(), count = referrers.len(), "Exported referrers");
        Ok(referrers.len())
    }
}

fn acquire(lock: &Mutex<()>, stage: Stage) -> Result<MutexGuard<'_, ()>, OrchestrationError> {
    lock.try_lock()
        .map_err(|_| OrchestrationError::AlreadyRunning(stage))
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("{0} is already running")]
    AlreadyRunning(Stage),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Referrers(#[from] ReferrersFileError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockVaultReader;
    use crate::db::init_db;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Pipeline) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("pipeline.db").to_string_lossy().to_string();
        let pool = init_db(&db_path).await.unwrap();
        let env = HashMap::from([
            ("DATABASE_PATH".to_string(), db_path),
            ("RPC_URL".to_string(), "http://localhost:0".to_string()),
            ("NETWORK".to_string(), "sepolia".to_string()),
            (
                "REFERRERS_FILE".to_string(),
                temp_dir.path().join("referrers.json").to_string_lossy().to_string(),
            ),
        ]);
        let config = Config::from_env_map(env).unwrap();
        let pipeline = Pipeline::new(
            Arc::new(Repository::new(pool)),
            Arc::new(MockVaultReader::new()),
            config,
        );
        (temp_dir, pipeline)
    }

    #[tokio::test]
    async fn test_stage_lock_fails_fast() {
        let (_dir, pipeline) = setup().await;
        let _held = pipeline.locks.ledger.lock().await;

        let err = pipeline.sync_ledger().await.unwrap_err();
        assert!(matches!(err, OrchestrationError::AlreadyRunning(Stage::LedgerSync)));
        assert_eq!(err.to_string(), "ledger_sync is already running");
    }

    #[tokio::test]
    async fn test_run_all_on_empty_database_is_noop() {
        let (_dir, pipeline) = setup().await;
        let summary = pipeline.run_all().await.unwrap();
        assert_eq!(summary.ledger, LedgerSyncSummary::default());
        assert_eq!(summary.exchange_rates.samples_written, 0);
        assert_eq!(summary.commissions.commissions_written, 0);
    }

    #[tokio::test]
    async fn test_export_then_import_referrers() {
        let (_dir, pipeline) = setup().await;
        let code = crate::domain::ReferralCode::new("9EFE5").unwrap();
        pipeline
            .repo()
            .upsert_referrers(&[crate::domain::Referrer {
                referral_code: code.clone(),
                percentage_bps: 1000,
            }])
            .await
            .unwrap();

        assert_eq!(pipeline.export_referrers().await.unwrap(), 1);
        let summary = pipeline.import_referrers().await.unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.unchanged, 1);
    }
}
