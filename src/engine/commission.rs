//! Referral commission replay.
//!
//! A referrer earns on the appreciation of the shares still attributed to its
//! code. Between two consecutive referrer rows the attributed balance is
//! constant, so the accrual for that interval is
//! `balance × (rate_now − rate_before) × protocol_fraction × referrer_fraction`.

use super::CommissionError;
use crate::domain::{Decimal, LedgerEntry, Referrer, ReferralCode, RoundingStrategy};
use rust_decimal::Decimal as RustDecimal;
use std::collections::HashMap;
use tracing::debug;

/// Decimal places kept on a stored commission amount.
pub const COMMISSION_SCALE: u32 = 18;

/// Basis points are expressed at scale 4; a product of two is at scale 8.
const BPS_PRODUCT_SCALE: u32 = 8;

/// Result of replaying one referrer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionOutcome {
    pub referral_code: ReferralCode,
    /// Commission accrued after the resume point, truncated to `COMMISSION_SCALE`.
    pub accrued: Decimal,
    /// Referrer rows replayed to rebuild the running balance.
    pub entries_replayed: usize,
    /// Referrer rows past the resume point that contributed.
    pub entries_accrued: usize,
    pub running_balance: Decimal,
}

pub struct CommissionCalculator<'a> {
    ledger: &'a [LedgerEntry],
    rates: &'a HashMap<i64, Decimal>,
    protocol_bps: u32,
}

impl<'a> CommissionCalculator<'a> {
    /// `ledger` is the full ledger in ledger order, `rates` maps block number
    /// to sampled exchange rate.
    pub fn new(
        ledger: &'a [LedgerEntry],
        rates: &'a HashMap<i64, Decimal>,
        protocol_bps: u32,
    ) -> Self {
        Self {
            ledger,
            rates,
            protocol_bps,
        }
    }

    /// Replay `referrer`'s rows and accrue commission for the rows whose id is
    /// greater than `resume_after`.
    ///
    /// The running balance is always rebuilt from the referrer's first row.
    pub fn accrue(
        &self,
        referrer: &Referrer,
        resume_after: Option<i64>,
    ) -> Result<CommissionOutcome, CommissionError> {
        let code = &referrer.referral_code;

        if let Some(watermark) = resume_after {
            if !self.ledger.iter().any(|e| e.id == Some(watermark)) {
                return Err(CommissionError::UnknownWatermark {
                    referral_code: code.clone(),
                    ledger_id: watermark,
                });
            }
        }

        let fraction = Decimal::new(RustDecimal::new(
            i64::from(self.protocol_bps) * i64::from(referrer.percentage_bps),
            BPS_PRODUCT_SCALE,
        ));

        let mut running = Decimal::zero();
        let mut total = Decimal::zero();
        let mut previous_block: Option<i64> = None;
        let mut replayed = 0usize;
        let mut accrued_rows = 0usize;

        for entry in self
            .ledger
            .iter()
            .filter(|e| e.referral_code.as_ref() == Some(code))
        {
            let block = entry.block_number();
            let overflow = || CommissionError::Overflow {
                referral_code: code.clone(),
                block_number: block,
            };

            let past_resume = match (resume_after, entry.id) {
                (Some(watermark), Some(id)) => id > watermark,
                _ => true,
            };

            if past_resume {
                let rate_now = self.rate_at(code, block)?;
                let rate_before = match previous_block {
                    Some(prev) => self.rate_at(code, prev)?,
                    None => Decimal::one(),
                };
                let contribution = rate_now
                    .checked_sub(rate_before)
                    .and_then(|delta| running.checked_mul(delta))
                    .and_then(|value| value.checked_mul(fraction))
                    .ok_or_else(overflow)?;
                total = total.checked_add(contribution).ok_or_else(overflow)?;
                accrued_rows += 1;
            }

            running = running
                .checked_add(entry.signed_amount())
                .ok_or_else(overflow)?;
            previous_block = Some(block);
            replayed += 1;
        }

        let accrued = total.round_to(COMMISSION_SCALE, RoundingStrategy::ToZero);
        debug!(
            referral_code = %code,
            replayed,
            accrued_rows,
            %accrued,
            "Replayed referrer ledger"
        );

        Ok(CommissionOutcome {
            referral_code: code.clone(),
            accrued,
            entries_replayed: replayed,
            entries_accrued: accrued_rows,
            running_balance: running,
        })
    }

    fn rate_at(&self, code: &ReferralCode, block: i64) -> Result<Decimal, CommissionError> {
        self.rates
            .get(&block)
            .copied()
            .ok_or_else(|| CommissionError::MissingExchangeRate {
                referral_code: code.clone(),
                block_number: block,
            })
    }
}
