//! Commission calculation across all referrers.

use super::{CommissionRunSummary, SyncError};
use crate::db::Repository;
use crate::domain::Commission;
use crate::engine::{CommissionCalculator, CommissionError};
use tracing::{debug, info};

pub struct CommissionRun<'a> {
    repo: &'a Repository,
    protocol_bps: u32,
}

impl<'a> CommissionRun<'a> {
    pub fn new(repo: &'a Repository, protocol_bps: u32) -> Self {
        Self { repo, protocol_bps }
    }

    /// Accrue commission for every referrer up to the newest ledger row.
    ///
    /// Referrers whose watermark already equals the newest ledger id are
    /// skipped. All new rows are written in one transaction, after every
    /// referrer has been computed.
    ///
    /// The run is all-or-nothing across referrers: one referrer that cannot
    /// be replayed fails the run and no referrer gets a row. The next run
    /// retries all of them once the missing rates are sampled.
    ///
    /// # Errors
    /// Returns `SyncError::Commission` if any referrer cannot be replayed
    /// (for example a missing exchange-rate sample), or a database error.
    pub async fn run(&self) -> Result<CommissionRunSummary, SyncError> {
        let referrers = self.repo.list_referrers().await?;
        let ledger = self.repo.ledger_ordered().await?;

        // Watermark from the loaded snapshot, so rows committed meanwhile are
        // picked up by the next run instead of being skipped.
        let Some(ledger_id) = ledger.iter().filter_map(|e| e.id).max() else {
            info!(referrers = referrers.len(), "Ledger is empty, no commissions to compute");
            return Ok(CommissionRunSummary {
                referrers: referrers.len(),
                ..Default::default()
            });
        };

        let rates = self.repo.exchange_rates().await?;
        let calculator = CommissionCalculator::new(&ledger, &rates, self.protocol_bps);

        let mut summary = CommissionRunSummary {
            referrers: referrers.len(),
            ledger_id: Some(ledger_id),
            ..Default::default()
        };
        let mut rows = Vec::new();

        for referrer in &referrers {
            let resume_after = self
                .repo
                .latest_commission_for(&referrer.referral_code)
                .await?
                .map(|c| c.ledger_id);

            if resume_after == Some(ledger_id) {
                debug!(referral_code = %referrer.referral_code, ledger_id, "Referrer up to date");
                summary.up_to_date += 1;
                continue;
            }

            let outcome = calculator.accrue(referrer, resume_after)?;
            info!(
                referral_code = %referrer.referral_code,
                resume_after,
                rows_accrued = outcome.entries_accrued,
                running_balance = %outcome.running_balance,
                accrued = %outcome.accrued,
                "Computed referrer commission"
            );

            summary.total_accrued = summary
                .total_accrued
                .checked_add(outcome.accrued)
                .ok_or_else(|| CommissionError::Overflow {
                    referral_code: referrer.referral_code.clone(),
                    block_number: ledger_id,
                })?;
            rows.push(Commission {
                id: None,
                referral_code: outcome.referral_code,
                commission_amount: outcome.accrued,
                is_paid: false,
                ledger_id,
            });
        }

        self.repo.insert_commissions(&rows).await?;
        summary.commissions_written = rows.len();

        info!(
            written = summary.commissions_written,
            up_to_date = summary.up_to_date,
            ledger_id,
            total = %summary.total_accrued,
            "Commission run committed"
        );
        Ok(summary)
    }
}
