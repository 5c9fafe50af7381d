//! Domain types for vault event reconciliation and referral commissions.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: Address, ReferralCode
//! - Raw vault events and their on-chain ordering key
//! - Ledger, exchange-rate, referrer and commission records

pub mod decimal;
pub mod event;
pub mod ledger;
pub mod ordering;
pub mod primitives;

pub use decimal::{Decimal, RoundingStrategy};
pub use event::{DepositEvent, RawEvent, TransferEvent, WithdrawalEvent};
pub use ledger::{Commission, EntryType, ExchangeRateSample, LedgerEntry, Referrer};
pub use ordering::{EventPosition, LedgerKey, StreamType};
pub use primitives::{Address, AddressParseError, ReferralCode};
