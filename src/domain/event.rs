//! Raw vault events as written by the ingestion pipeline.

use crate::domain::{Address, Decimal, EventPosition, ReferralCode, StreamType};
use serde::{Deserialize, Serialize};

/// ERC-4626 style `Deposit(sender, owner, assets, shares)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub position: EventPosition,
    /// Block timestamp, unix seconds.
    pub timestamp: i64,
    pub sender: Address,
    /// Receives the minted shares; the ledger credits this address.
    pub owner: Address,
    pub assets: Decimal,
    pub shares: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<ReferralCode>,
}

/// `Withdraw(sender, receiver, owner, assets, shares)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub position: EventPosition,
    pub timestamp: i64,
    pub sender: Address,
    pub receiver: Address,
    /// Whose shares are burned; the ledger debits this address.
    pub owner: Address,
    pub assets: Decimal,
    pub shares: Decimal,
}

/// Share token `Transfer(from, to, value)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub position: EventPosition,
    pub timestamp: i64,
    pub from: Address,
    pub to: Address,
    pub value: Decimal,
}

impl TransferEvent {
    /// Mint and burn transfers have a zero endpoint.
    pub fn is_mint_or_burn(&self) -> bool {
        self.from.is_zero() || self.to.is_zero()
    }
}

/// One event from any of the three streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawEvent {
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
    Transfer(TransferEvent),
}

impl RawEvent {
    pub fn position(&self) -> EventPosition {
        match self {
            RawEvent::Deposit(e) => e.position,
            RawEvent::Withdrawal(e) => e.position,
            RawEvent::Transfer(e) => e.position,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            RawEvent::Deposit(e) => e.timestamp,
            RawEvent::Withdrawal(e) => e.timestamp,
            RawEvent::Transfer(e) => e.timestamp,
        }
    }

    pub fn stream(&self) -> StreamType {
        match self {
            RawEvent::Deposit(_) => StreamType::Deposit,
            RawEvent::Withdrawal(_) => StreamType::Withdrawal,
            RawEvent::Transfer(_) => StreamType::Transfer,
        }
    }

    /// Every address the event touches.
    pub fn participants(&self) -> Vec<&Address> {
        match self {
            RawEvent::Deposit(e) => vec![&e.owner],
            RawEvent::Withdrawal(e) => vec![&e.owner],
            RawEvent::Transfer(e) => vec![&e.from, &e.to],
        }
    }
}

impl From<DepositEvent> for RawEvent {
    fn from(e: DepositEvent) -> Self {
        RawEvent::Deposit(e)
    }
}

impl From<WithdrawalEvent> for RawEvent {
    fn from(e: WithdrawalEvent) -> Self {
        RawEvent::Withdrawal(e)
    }
}

impl From<TransferEvent> for RawEvent {
    fn from(e: TransferEvent) -> Self {
        RawEvent::Transfer(e)
    }
}
