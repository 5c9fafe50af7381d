use crate::domain::{
    Address, Decimal, EntryType, EventPosition, LedgerEntry, LedgerKey, RawEvent, ReferralCode,
    StreamType,
};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::LedgerError;

/// Unconsumed remainder of a deposit (or of a transfer-originated deposit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lot {
    pub amount_remaining: Decimal,
    pub referral_code: Option<ReferralCode>,
    /// Ledger row that opened the lot.
    pub origin: LedgerKey,
}

/// FIFO lot matcher.
///
/// Deposits open lots per user; withdrawals and transfers consume the oldest
/// lots first and inherit their referral codes. Transfers re-open the matched
/// amounts as lots for the recipient.
pub struct LotMatcher {
    open_lots: HashMap<Address, VecDeque<Lot>>,

    // Entries emitted by `process`, in ledger order.
    entries: Vec<LedgerEntry>,
}

impl LotMatcher {
    pub fn new() -> Self {
        Self {
            open_lots: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Rebuild open lots from committed ledger rows.
    ///
    /// `history` must hold every committed row of each user it mentions, in
    /// ledger order. Withdrawal rows were cut lot by lot, so each must fit
    /// inside the front lot and carry its referral code.
    pub fn seed(&mut self, history: &[LedgerEntry]) -> Result<(), LedgerError> {
        for entry in history {
            match entry.entry_type {
                EntryType::Deposit => {
                    self.push_lot(
                        &entry.user,
                        Lot {
                            amount_remaining: entry.amount,
                            referral_code: entry.referral_code.clone(),
                            origin: entry.key,
                        },
                    );
                }
                EntryType::Withdrawal => self.replay_withdrawal(entry)?,
            }
        }
        Ok(())
    }

    fn replay_withdrawal(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let corrupt = |reason: String| LedgerError::CorruptHistory {
            user: entry.user.clone(),
            position: entry.position(),
            reason,
        };

        let queue = self.open_lots.entry(entry.user.clone()).or_default();
        let Some(front) = queue.front_mut() else {
            return Err(corrupt("withdrawal without an open lot".to_string()));
        };
        if front.referral_code != entry.referral_code {
            return Err(corrupt(format!(
                "withdrawal referral {:?} does not match lot referral {:?}",
                entry.referral_code.as_ref().map(ReferralCode::as_str),
                front.referral_code.as_ref().map(ReferralCode::as_str),
            )));
        }
        if entry.amount > front.amount_remaining {
            return Err(corrupt(format!(
                "withdrawal of {} exceeds front lot of {}",
                entry.amount, front.amount_remaining
            )));
        }

        front.amount_remaining = front.amount_remaining - entry.amount;
        let exhausted = front.amount_remaining.is_zero();
        if exhausted {
            queue.pop_front();
        }
        Ok(())
    }

    /// Apply one merged raw event, emitting its ledger rows.
    ///
    /// On error nothing from this event is emitted and lot state is unchanged.
    pub fn process(&mut self, event: &RawEvent) -> Result<(), LedgerError> {
        match event {
            RawEvent::Deposit(deposit) => {
                ensure_non_negative(StreamType::Deposit, deposit.position, deposit.shares)?;
                let key = LedgerKey::new(deposit.position, 0);
                self.entries.push(LedgerEntry {
                    id: None,
                    key,
                    timestamp: deposit.timestamp,
                    user: deposit.owner.clone(),
                    amount: deposit.shares,
                    entry_type: EntryType::Deposit,
                    referral_code: deposit.referral_code.clone(),
                });
                self.push_lot(
                    &deposit.owner,
                    Lot {
                        amount_remaining: deposit.shares,
                        referral_code: deposit.referral_code.clone(),
                        origin: key,
                    },
                );
                Ok(())
            }
            RawEvent::Withdrawal(withdrawal) => self.debit(Debit {
                owner: &withdrawal.owner,
                recipient: None,
                amount: withdrawal.shares,
                stream: StreamType::Withdrawal,
                position: withdrawal.position,
                timestamp: withdrawal.timestamp,
            }),
            RawEvent::Transfer(transfer) => {
                if transfer.is_mint_or_burn() {
                    debug!(
                        position = %transfer.position,
                        "Skipping mint/burn transfer, covered by deposit/withdrawal events"
                    );
                    return Ok(());
                }
                self.debit(Debit {
                    owner: &transfer.from,
                    recipient: Some(&transfer.to),
                    amount: transfer.value,
                    stream: StreamType::Transfer,
                    position: transfer.position,
                    timestamp: transfer.timestamp,
                })
            }
        }
    }

    fn debit(&mut self, debit: Debit<'_>) -> Result<(), LedgerError> {
        ensure_non_negative(debit.stream, debit.position, debit.amount)?;

        let queue = self.open_lots.entry(debit.owner.clone()).or_default();

        let mut available = Decimal::zero();
        for lot in queue.iter() {
            available = available.checked_add(lot.amount_remaining).ok_or_else(|| {
                LedgerError::Overflow {
                    user: debit.owner.clone(),
                    position: debit.position,
                }
            })?;
        }
        if available < debit.amount {
            return Err(LedgerError::InsufficientDeposits {
                user: debit.owner.clone(),
                stream: debit.stream,
                position: debit.position,
                shortfall: debit.amount - available,
            });
        }

        let mut yet_to_match = debit.amount;
        let mut order_index = 0i64;
        let mut emitted = Vec::new();
        let mut reopened = Vec::new();

        while yet_to_match.is_positive() {
            let Some(lot) = queue.front_mut() else {
                // Unreachable after the availability check above.
                return Err(LedgerError::InsufficientDeposits {
                    user: debit.owner.clone(),
                    stream: debit.stream,
                    position: debit.position,
                    shortfall: yet_to_match,
                });
            };
            let matched = yet_to_match.min(lot.amount_remaining);

            emitted.push(LedgerEntry {
                id: None,
                key: LedgerKey::new(debit.position, order_index),
                timestamp: debit.timestamp,
                user: debit.owner.clone(),
                amount: matched,
                entry_type: EntryType::Withdrawal,
                referral_code: lot.referral_code.clone(),
            });
            order_index += 1;

            if let Some(recipient) = debit.recipient {
                let key = LedgerKey::new(debit.position, order_index);
                emitted.push(LedgerEntry {
                    id: None,
                    key,
                    timestamp: debit.timestamp,
                    user: recipient.clone(),
                    amount: matched,
                    entry_type: EntryType::Deposit,
                    referral_code: lot.referral_code.clone(),
                });
                reopened.push(Lot {
                    amount_remaining: matched,
                    referral_code: lot.referral_code.clone(),
                    origin: key,
                });
                order_index += 1;
            }

            lot.amount_remaining = lot.amount_remaining - matched;
            yet_to_match = yet_to_match - matched;
            let exhausted = lot.amount_remaining.is_zero();
            if exhausted {
                queue.pop_front();
            }
        }

        debug!(
            user = %debit.owner,
            stream = %debit.stream,
            position = %debit.position,
            rows = emitted.len(),
            "Matched debit against open lots"
        );

        self.entries.extend(emitted);
        // Re-opened lots are queued only after the debit is fully matched, so a
        // self-transfer never consumes its own mirror.
        if let Some(recipient) = debit.recipient {
            for lot in reopened {
                self.push_lot(recipient, lot);
            }
        }
        Ok(())
    }

    fn push_lot(&mut self, user: &Address, lot: Lot) {
        if lot.amount_remaining.is_zero() {
            return;
        }
        self.open_lots.entry(user.clone()).or_default().push_back(lot);
    }

    /// Open lots of a user, oldest first.
    pub fn open_lots(&self, user: &Address) -> Vec<&Lot> {
        self.open_lots
            .get(user)
            .map(|queue| queue.iter().collect())
            .unwrap_or_default()
    }

    /// Sum of a user's open lots.
    pub fn open_balance(&self, user: &Address) -> Decimal {
        self.open_lots(user)
            .into_iter()
            .fold(Decimal::zero(), |acc, lot| acc + lot.amount_remaining)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LedgerEntry> {
        self.entries
    }
}

impl Default for LotMatcher {
    fn default() -> Self {
        Self::new()
    }
}

struct Debit<'a> {
    owner: &'a Address,
    recipient: Option<&'a Address>,
    amount: Decimal,
    stream: StreamType,
    position: EventPosition,
    timestamp: i64,
}

fn ensure_non_negative(
    stream: StreamType,
    position: EventPosition,
    amount: Decimal,
) -> Result<(), LedgerError> {
    if amount.is_negative() {
        return Err(LedgerError::NegativeAmount {
            stream,
            position,
            amount,
        });
    }
    Ok(())
}

/// Check that no user's cumulative balance ever drops below zero.
///
/// `entries` must be in ledger order.
pub fn verify_conservation(entries: &[LedgerEntry]) -> Result<(), LedgerError> {
    let mut balances: HashMap<&Address, Decimal> = HashMap::new();
    for entry in entries {
        let balance = balances.entry(&entry.user).or_default();
        *balance = balance
            .checked_add(entry.signed_amount())
            .ok_or_else(|| LedgerError::Overflow {
                user: entry.user.clone(),
                position: entry.position(),
            })?;
        if balance.is_negative() {
            return Err(LedgerError::NegativeBalance {
                user: entry.user.clone(),
                position: entry.position(),
                balance: *balance,
            });
        }
    }
    Ok(())
}
