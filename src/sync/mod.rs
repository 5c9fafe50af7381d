//! The three resumable pipeline stages.
//!
//! This module provides:
//! - Ledger sync: raw events after the stream checkpoints into ledger rows
//! - Exchange-rate sampling for every new ledger block
//! - Commission calculation per referrer
//!
//! Each stage is idempotent: invoking it again with no new upstream data
//! writes nothing.

use crate::datasource::DataSourceError;
use crate::domain::{Decimal, EventPosition, StreamType};
use crate::engine::{CommissionError, LedgerError};
use serde::Serialize;
use thiserror::Error;

pub mod commissions;
pub mod ledger;
pub mod rates;

pub use commissions::CommissionRun;
pub use ledger::LedgerSync;
pub use rates::{RateSampler, RATE_SCALE};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Commission(#[from] CommissionError),
    #[error("vault read failed: {0}")]
    DataSource(#[from] DataSourceError),
    #[error("exchange rate at block {block_number} overflows: {assets} / {shares}")]
    RateOverflow {
        block_number: i64,
        assets: Decimal,
        shares: Decimal,
    },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// New position of one stream checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckpointUpdate {
    pub stream: StreamType,
    pub position: EventPosition,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSyncSummary {
    pub events_processed: usize,
    pub entries_written: usize,
    pub users_touched: usize,
    pub checkpoints: Vec<CheckpointUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateSamplingSummary {
    pub blocks_pending: usize,
    pub samples_written: usize,
    pub skipped_zero_supply: usize,
    pub last_sampled_block: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommissionRunSummary {
    pub referrers: usize,
    pub commissions_written: usize,
    pub up_to_date: usize,
    /// Ledger watermark recorded on the new rows.
    pub ledger_id: Option<i64>,
    pub total_accrued: Decimal,
}
