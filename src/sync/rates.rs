//! Exchange-rate sampling for ledger blocks.

use super::{RateSamplingSummary, SyncError};
use crate::config::RateSamplingConfig;
use crate::datasource::VaultReader;
use crate::db::Repository;
use crate::domain::{ExchangeRateSample, RoundingStrategy};
use tracing::{debug, info, warn};

/// Decimal places kept on a sampled rate.
pub const RATE_SCALE: u32 = 18;

pub struct RateSampler<'a> {
    repo: &'a Repository,
    reader: &'a dyn VaultReader,
    config: RateSamplingConfig,
}

impl<'a> RateSampler<'a> {
    pub fn new(repo: &'a Repository, reader: &'a dyn VaultReader, config: RateSamplingConfig) -> Self {
        Self {
            repo,
            reader,
            config,
        }
    }

    /// Sample every ledger block above the highest sampled block.
    ///
    /// Samples are flushed every `batch_size`; a failed read discards only the
    /// unflushed tail, and the next run resumes after the last flushed block.
    ///
    /// # Errors
    /// Returns an error if a vault read (after retries) or a write fails.
    pub async fn run(&self) -> Result<RateSamplingSummary, SyncError> {
        let watermark = self.repo.max_sampled_block().await?;
        let blocks = self.repo.distinct_ledger_blocks_after(watermark).await?;

        let mut summary = RateSamplingSummary {
            blocks_pending: blocks.len(),
            last_sampled_block: watermark,
            ..Default::default()
        };
        if blocks.is_empty() {
            info!(watermark, "No new ledger blocks to sample");
            return Ok(summary);
        }

        let batch_size = self.config.batch_size.max(1);
        let pacing_every = self.config.pacing_every.max(1);
        let mut batch: Vec<ExchangeRateSample> = Vec::with_capacity(batch_size);

        for (idx, &block_number) in blocks.iter().enumerate() {
            if let Some(sample) = self.sample(block_number).await? {
                batch.push(sample);
            } else {
                summary.skipped_zero_supply += 1;
            }

            if batch.len() >= batch_size {
                summary.samples_written += self.flush(&mut batch, &mut summary.last_sampled_block).await?;
            }

            let read = idx + 1;
            if read % pacing_every == 0 && read < blocks.len() {
                debug!(read, delay_ms = self.config.pacing_delay.as_millis() as u64, "Pacing vault reads");
                tokio::time::sleep(self.config.pacing_delay).await;
            }
        }
        summary.samples_written += self.flush(&mut batch, &mut summary.last_sampled_block).await?;

        info!(
            pending = summary.blocks_pending,
            written = summary.samples_written,
            skipped = summary.skipped_zero_supply,
            last_block = summary.last_sampled_block,
            "Exchange-rate sampling finished"
        );
        Ok(summary)
    }

    async fn sample(&self, block_number: i64) -> Result<Option<ExchangeRateSample>, SyncError> {
        let assets = self.reader.total_assets(block_number).await?;
        let shares = self.reader.total_shares(block_number).await?;

        if shares.is_zero() {
            warn!(block_number, %assets, "Vault has no shares at block, rate undefined");
            return Ok(None);
        }

        let rate = assets
            .div_rounded(shares, RATE_SCALE, RoundingStrategy::ToZero)
            .ok_or(SyncError::RateOverflow {
                block_number,
                assets,
                shares,
            })?;
        debug!(block_number, %rate, "Sampled exchange rate");
        Ok(Some(ExchangeRateSample { block_number, rate }))
    }

    async fn flush(
        &self,
        batch: &mut Vec<ExchangeRateSample>,
        last_sampled: &mut Option<i64>,
    ) -> Result<usize, SyncError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let written = self.repo.insert_exchange_rates(batch).await?;
        if let Some(last) = batch.last() {
            *last_sampled = Some(last.block_number);
        }
        debug!(written, batch = batch.len(), "Flushed exchange-rate batch");
        batch.clear();
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{DataSourceError, MockVaultReader};
    use crate::db::init_db;
    use crate::domain::{
        Address, Decimal, EntryType, EventPosition, LedgerEntry, LedgerKey,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup_repo() -> (TempDir, Repository) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("rates.db").to_string_lossy().to_string();
        let pool = init_db(&db_path).await.unwrap();
        (temp_dir, Repository::new(pool))
    }

    async fn seed_ledger_blocks(repo: &Repository, blocks: &[i64]) {
        let entries: Vec<LedgerEntry> = blocks
            .iter()
            .map(|&block| LedgerEntry {
                id: None,
                key: LedgerKey::new(EventPosition::new(block, 0, 0), 0),
                timestamp: block,
                user: Address::parse("0xa").unwrap(),
                amount: Decimal::from_i64(1),
                entry_type: EntryType::Deposit,
                referral_code: None,
            })
            .collect();
        repo.commit_ledger_sync(&entries, &[]).await.unwrap();
    }

    fn fast_config(batch_size: usize) -> RateSamplingConfig {
        RateSamplingConfig {
            batch_size,
            pacing_every: 2,
            pacing_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_samples_each_block_once() {
        let (_dir, repo) = setup_repo().await;
        seed_ledger_blocks(&repo, &[1, 2, 2, 3]).await;
        let reader = MockVaultReader::new()
            .with_block(1, 1_000, 1_000)
            .with_block(2, 1_100, 1_000)
            .with_block(3, 2_000, 1_500);

        let summary = RateSampler::new(&repo, &reader, fast_config(2))
            .run()
            .await
            .unwrap();
        assert_eq!(summary.blocks_pending, 3);
        assert_eq!(summary.samples_written, 3);
        assert_eq!(summary.last_sampled_block, Some(3));

        let rates = repo.exchange_rates().await.unwrap();
        assert_eq!(rates[&2], Decimal::from_str_canonical("1.1").unwrap());
        assert_eq!(
            rates[&3],
            Decimal::from_str_canonical("1.333333333333333333").unwrap()
        );

        // Nothing new: no reads, no writes.
        let calls = reader.calls();
        let again = RateSampler::new(&repo, &reader, fast_config(2))
            .run()
            .await
            .unwrap();
        assert_eq!(again.samples_written, 0);
        assert_eq!(reader.calls(), calls);
    }

    #[tokio::test]
    async fn test_zero_supply_block_is_skipped() {
        let (_dir, repo) = setup_repo().await;
        seed_ledger_blocks(&repo, &[1, 2]).await;
        let reader = MockVaultReader::new()
            .with_block(1, 0, 0)
            .with_block(2, 10, 10);

        let summary = RateSampler::new(&repo, &reader, fast_config(30))
            .run()
            .await
            .unwrap();
        assert_eq!(summary.skipped_zero_supply, 1);
        assert_eq!(summary.samples_written, 1);
        assert!(repo.exchange_rate_at(1).await.unwrap().is_none());
        assert_eq!(repo.exchange_rate_at(2).await.unwrap(), Some(Decimal::one()));
    }

    #[tokio::test]
    async fn test_failed_read_keeps_flushed_batches_only() {
        let (_dir, repo) = setup_repo().await;
        seed_ledger_blocks(&repo, &[1, 2, 3]).await;
        let reader = MockVaultReader::new()
            .with_block(1, 1, 1)
            .with_block(2, 1, 1)
            .with_failure(3, DataSourceError::RateLimited);

        let err = RateSampler::new(&repo, &reader, fast_config(1))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DataSource(DataSourceError::RateLimited)));
        assert_eq!(repo.max_sampled_block().await.unwrap(), Some(2));

        let healed = MockVaultReader::new().with_block(3, 2, 1);
        let summary = RateSampler::new(&repo, &healed, fast_config(1))
            .run()
            .await
            .unwrap();
        assert_eq!(summary.samples_written, 1);
        assert_eq!(repo.max_sampled_block().await.unwrap(), Some(3));
    }
}
