//! Pure computation engine(s) for deterministic ledger logic.
//!
//! Nothing in here performs I/O; the sync stages feed data in and persist
//! what comes out.

use crate::domain::{Address, Decimal, EventPosition, ReferralCode, StreamType};
use thiserror::Error;

pub mod commission;
pub mod lot_matcher;
pub mod merge;

pub use commission::{CommissionCalculator, CommissionOutcome, COMMISSION_SCALE};
pub use lot_matcher::{verify_conservation, Lot, LotMatcher};
pub use merge::{assert_monotonic, merge_streams};

/// Fatal conditions raised while building ledger entries.
///
/// Every variant carries enough context to locate the offending event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ordering violation in {stream} stream: {current} follows {previous}")]
    OrderingViolation {
        stream: StreamType,
        previous: EventPosition,
        current: EventPosition,
    },
    #[error("more withdrawals than deposits for user {user}: {stream} at {position} is short by {shortfall}")]
    InsufficientDeposits {
        user: Address,
        stream: StreamType,
        position: EventPosition,
        shortfall: Decimal,
    },
    #[error("negative {stream} amount {amount} at {position}")]
    NegativeAmount {
        stream: StreamType,
        position: EventPosition,
        amount: Decimal,
    },
    #[error("ledger history for user {user} is inconsistent at {position}: {reason}")]
    CorruptHistory {
        user: Address,
        position: EventPosition,
        reason: String,
    },
    #[error("balance of user {user} drops to {balance} at {position}")]
    NegativeBalance {
        user: Address,
        position: EventPosition,
        balance: Decimal,
    },
    #[error("arithmetic overflow for user {user} at {position}")]
    Overflow {
        user: Address,
        position: EventPosition,
    },
}

/// Fatal conditions raised while replaying a referrer's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommissionError {
    #[error("no exchange rate sampled for block {block_number} (referrer {referral_code})")]
    MissingExchangeRate {
        referral_code: ReferralCode,
        block_number: i64,
    },
    #[error("commission watermark {ledger_id} for referrer {referral_code} is not in the ledger")]
    UnknownWatermark {
        referral_code: ReferralCode,
        ledger_id: i64,
    },
    #[error("arithmetic overflow replaying referrer {referral_code} at block {block_number}")]
    Overflow {
        referral_code: ReferralCode,
        block_number: i64,
    },
}
