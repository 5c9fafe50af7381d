//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `events.rs` - Raw deposit, withdrawal and transfer rows
//! - `ledger.rs` - Checkpoints and the reconciled ledger
//! - `rates.rs` - Exchange-rate samples
//! - `referrers.rs` - Referrers and commissions

mod events;
mod ledger;
mod rates;
mod referrers;

use crate::domain::{Address, Decimal, ReferralCode};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use thiserror::Error;

pub use referrers::UpsertSummary;

/// Errors from repository operations that enforce domain rules.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("referrer {referral_code} already has percentage {existing}, refusing to change it to {requested}")]
    ImmutablePercentage {
        referral_code: ReferralCode,
        existing: u32,
        requested: u32,
    },
}

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Round-trip a trivial query.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Stored values that fail to parse surface as decode errors, never defaults.

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str_canonical(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn address_column(row: &SqliteRow, column: &str) -> Result<Address, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Address::parse(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn optional_code_column(row: &SqliteRow, column: &str) -> Result<Option<ReferralCode>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    Ok(raw.and_then(ReferralCode::new))
}

fn code_column(row: &SqliteRow, column: &str) -> Result<ReferralCode, sqlx::Error> {
    optional_code_column(row, column)?.ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: "blank referral code".into(),
    })
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
