//! Reconciled accounting records and the tables derived from them.

use crate::domain::{Address, Decimal, EventPosition, LedgerKey, ReferralCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    Deposit,
    Withdrawal,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "DEPOSIT",
            EntryType::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(EntryType::Deposit),
            "WITHDRAWAL" => Ok(EntryType::Withdrawal),
            other => Err(format!("unknown ledger entry type: {}", other)),
        }
    }
}

/// One row of the append-only ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Database id; `None` until the row is committed.
    pub id: Option<i64>,
    pub key: LedgerKey,
    /// Block timestamp of the originating event, unix seconds.
    pub timestamp: i64,
    pub user: Address,
    pub amount: Decimal,
    pub entry_type: EntryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<ReferralCode>,
}

impl LedgerEntry {
    pub fn position(&self) -> EventPosition {
        self.key.position
    }

    pub fn block_number(&self) -> i64 {
        self.key.position.block_number
    }

    /// Signed effect on the owner's balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Deposit => self.amount,
            EntryType::Withdrawal => -self.amount,
        }
    }
}

/// Vault share price at a block: total_assets / total_shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRateSample {
    pub block_number: i64,
    pub rate: Decimal,
}

/// A referrer and its commission share in basis points (1000 = 10%).
///
/// The share is fixed once the referrer exists; commission replay assumes a
/// single value for the referrer's whole history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referrer {
    pub referral_code: ReferralCode,
    #[serde(rename = "percentage")]
    pub percentage_bps: u32,
}

/// Commission accrued by a referrer up to `ledger_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    pub id: Option<i64>,
    pub referral_code: ReferralCode,
    pub commission_amount: Decimal,
    pub is_paid: bool,
    /// Last ledger id covered; the referrer's resume point.
    pub ledger_id: i64,
}
