//! Ledger sync: raw events after the checkpoints into FIFO-matched ledger rows.

use super::{CheckpointUpdate, LedgerSyncSummary, SyncError};
use crate::db::Repository;
use crate::domain::{Address, EventPosition, RawEvent, StreamType};
use crate::engine::{merge_streams, verify_conservation, LedgerError, LotMatcher};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub struct LedgerSync<'a> {
    repo: &'a Repository,
}

impl<'a> LedgerSync<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    /// Process every raw event after the stream checkpoints.
    ///
    /// Ledger rows and checkpoints are committed together or not at all. Any
    /// ordering, lot or conservation failure aborts before writing.
    ///
    /// # Errors
    /// Returns `SyncError::Ledger` on an invariant violation, or a database error.
    pub async fn run(&self) -> Result<LedgerSyncSummary, SyncError> {
        let deposit_cp = self.repo.get_checkpoint(StreamType::Deposit).await?;
        let withdrawal_cp = self.repo.get_checkpoint(StreamType::Withdrawal).await?;
        let transfer_cp = self.repo.get_checkpoint(StreamType::Transfer).await?;

        let deposits = self.repo.deposits_after(deposit_cp).await?;
        let withdrawals = self.repo.withdrawals_after(withdrawal_cp).await?;
        let transfers = self.repo.transfers_after(transfer_cp).await?;

        let checkpoints: Vec<CheckpointUpdate> = [
            (StreamType::Deposit, deposits.last().map(|e| e.position)),
            (StreamType::Withdrawal, withdrawals.last().map(|e| e.position)),
            (StreamType::Transfer, transfers.last().map(|e| e.position)),
        ]
        .into_iter()
        .filter_map(|(stream, last)| last.map(|position| CheckpointUpdate { stream, position }))
        .collect();

        debug!(
            deposits = deposits.len(),
            withdrawals = withdrawals.len(),
            transfers = transfers.len(),
            "Fetched raw events after checkpoints"
        );

        let merged = merge_streams(deposits, withdrawals, transfers)?;
        let fetched = merged.len();
        if merged.is_empty() {
            info!("No new raw events, ledger is up to date");
            return Ok(LedgerSyncSummary::default());
        }

        // Mint and burn transfers never produce rows; they only move the
        // transfer checkpoint.
        let events: Vec<RawEvent> = merged
            .into_iter()
            .filter(|e| !matches!(e, RawEvent::Transfer(t) if t.is_mint_or_burn()))
            .collect();
        let cp_writes: Vec<(StreamType, EventPosition)> =
            checkpoints.iter().map(|c| (c.stream, c.position)).collect();

        let Some(first) = events.first() else {
            self.repo.commit_ledger_sync(&[], &cp_writes).await?;
            info!(
                skipped = fetched,
                "Only mint/burn transfers, advanced checkpoints"
            );
            return Ok(LedgerSyncSummary {
                events_processed: fetched,
                checkpoints,
                ..Default::default()
            });
        };

        // Events behind the committed ledger would break ledger order.
        if let Some(last) = self.repo.last_ledger_position().await? {
            if first.position() < last {
                return Err(LedgerError::OrderingViolation {
                    stream: first.stream(),
                    previous: last,
                    current: first.position(),
                }
                .into());
            }
        }

        let users: BTreeSet<Address> = events
            .iter()
            .flat_map(|e| e.participants())
            .filter(|a| !a.is_zero())
            .cloned()
            .collect();
        let users: Vec<Address> = users.into_iter().collect();

        let mut history = self.repo.ledger_history_for_users(&users).await?;

        let mut matcher = LotMatcher::new();
        matcher.seed(&history)?;
        for event in &events {
            matcher.process(event)?;
        }
        let entries = matcher.into_entries();

        history.extend(entries.iter().cloned());
        verify_conservation(&history)?;

        let ids = self.repo.commit_ledger_sync(&entries, &cp_writes).await?;

        let summary = LedgerSyncSummary {
            events_processed: fetched,
            entries_written: ids.len(),
            users_touched: users.len(),
            checkpoints,
        };
        info!(
            events = summary.events_processed,
            entries = summary.entries_written,
            users = summary.users_touched,
            first_id = ids.first().copied(),
            last_id = ids.last().copied(),
            "Ledger sync committed"
        );
        Ok(summary)
    }
}
