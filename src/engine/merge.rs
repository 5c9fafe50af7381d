//! Merge of the three raw event streams into one chain-ordered sequence.

use super::LedgerError;
use crate::domain::{DepositEvent, EventPosition, RawEvent, TransferEvent, WithdrawalEvent};
use std::iter::Peekable;
use std::vec::IntoIter;

/// Merge the per-stream event lists into one sequence ordered by
/// `(block_number, tx_index, event_index)`.
///
/// Each input must already be ascending; inputs are not re-sorted, so an
/// unsorted stream surfaces as an `OrderingViolation` instead of being
/// silently repaired. Equal keys keep stream order (deposit, withdrawal,
/// transfer) and, within a stream, input order.
pub fn merge_streams(
    deposits: Vec<DepositEvent>,
    withdrawals: Vec<WithdrawalEvent>,
    transfers: Vec<TransferEvent>,
) -> Result<Vec<RawEvent>, LedgerError> {
    let total = deposits.len() + withdrawals.len() + transfers.len();
    let mut streams: [Peekable<IntoIter<RawEvent>>; 3] = [
        into_stream(deposits),
        into_stream(withdrawals),
        into_stream(transfers),
    ];

    let mut merged = Vec::with_capacity(total);
    loop {
        let mut pick: Option<(usize, EventPosition)> = None;
        for (idx, stream) in streams.iter_mut().enumerate() {
            if let Some(head) = stream.peek() {
                let position = head.position();
                // Strict comparison keeps the earlier stream on ties.
                if pick.map_or(true, |(_, best)| position < best) {
                    pick = Some((idx, position));
                }
            }
        }

        let Some((idx, _)) = pick else { break };
        if let Some(event) = streams[idx].next() {
            merged.push(event);
        }
    }

    assert_monotonic(&merged)?;
    Ok(merged)
}

fn into_stream<E: Into<RawEvent>>(events: Vec<E>) -> Peekable<IntoIter<RawEvent>> {
    events
        .into_iter()
        .map(Into::into)
        .collect::<Vec<RawEvent>>()
        .into_iter()
        .peekable()
}

/// Fail if any event's key is smaller than its predecessor's.
pub fn assert_monotonic(events: &[RawEvent]) -> Result<(), LedgerError> {
    for pair in events.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        if current.position() < previous.position() {
            return Err(LedgerError::OrderingViolation {
                stream: current.stream(),
                previous: previous.position(),
                current: current.position(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Decimal, StreamType};

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn deposit(block: i64, tx: i64, ev: i64) -> DepositEvent {
        DepositEvent {
            position: EventPosition::new(block, tx, ev),
            timestamp: block * 10,
            sender: addr("0x1"),
            owner: addr("0x1"),
            assets: Decimal::from_i64(10),
            shares: Decimal::from_i64(10),
            referral_code: None,
        }
    }

    fn withdrawal(block: i64, tx: i64, ev: i64) -> WithdrawalEvent {
        WithdrawalEvent {
            position: EventPosition::new(block, tx, ev),
            timestamp: block * 10,
            sender: addr("0x1"),
            receiver: addr("0x1"),
            owner: addr("0x1"),
            assets: Decimal::from_i64(1),
            shares: Decimal::from_i64(1),
        }
    }

    fn transfer(block: i64, tx: i64, ev: i64) -> TransferEvent {
        TransferEvent {
            position: EventPosition::new(block, tx, ev),
            timestamp: block * 10,
            from: addr("0x1"),
            to: addr("0x2"),
            value: Decimal::from_i64(1),
        }
    }

    fn positions(events: &[RawEvent]) -> Vec<(i64, i64, i64)> {
        events
            .iter()
            .map(|e| {
                let p = e.position();
                (p.block_number, p.tx_index, p.event_index)
            })
            .collect()
    }

    #[test]
    fn test_merge_interleaves_by_position() {
        let merged = merge_streams(
            vec![deposit(1, 0, 0), deposit(3, 0, 0)],
            vec![withdrawal(2, 1, 0), withdrawal(3, 0, 2)],
            vec![transfer(2, 0, 5), transfer(3, 0, 1)],
        )
        .unwrap();

        assert_eq!(
            positions(&merged),
            vec![
                (1, 0, 0),
                (2, 0, 5),
                (2, 1, 0),
                (3, 0, 0),
                (3, 0, 1),
                (3, 0, 2)
            ]
        );
        assert_eq!(merged[1].stream(), StreamType::Transfer);
        assert_eq!(merged[2].stream(), StreamType::Withdrawal);
    }

    #[test]
    fn test_merge_is_stable_on_equal_keys() {
        let merged = merge_streams(
            vec![deposit(5, 0, 0)],
            vec![withdrawal(5, 0, 0)],
            vec![transfer(5, 0, 0)],
        )
        .unwrap();

        let streams: Vec<StreamType> = merged.iter().map(RawEvent::stream).collect();
        assert_eq!(
            streams,
            vec![
                StreamType::Deposit,
                StreamType::Withdrawal,
                StreamType::Transfer
            ]
        );
    }

    #[test]
    fn test_merge_rejects_unsorted_stream() {
        let err = merge_streams(vec![deposit(4, 0, 0), deposit(2, 0, 0)], vec![], vec![])
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::OrderingViolation {
                stream: StreamType::Deposit,
                previous: EventPosition::new(4, 0, 0),
                current: EventPosition::new(2, 0, 0),
            }
        );
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_streams(vec![], vec![], vec![]).unwrap().is_empty());
    }
}
