//! Chain positions and the total order shared by raw events and ledger rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of an event on chain.
///
/// Ordering: block_number -> tx_index -> event_index.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventPosition {
    pub block_number: i64,
    pub tx_index: i64,
    pub event_index: i64,
}

impl EventPosition {
    pub fn new(block_number: i64, tx_index: i64, event_index: i64) -> Self {
        Self {
            block_number,
            tx_index,
            event_index,
        }
    }

    /// The position a stream starts from before anything was consumed.
    pub fn genesis() -> Self {
        Self::default()
    }
}

impl fmt::Display for EventPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.block_number, self.tx_index, self.event_index
        )
    }
}

/// Total order of ledger rows: the originating event position, then the
/// row's index within that event.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LedgerKey {
    pub position: EventPosition,
    pub order_index: i64,
}

impl LedgerKey {
    pub fn new(position: EventPosition, order_index: i64) -> Self {
        Self {
            position,
            order_index,
        }
    }
}

/// The three raw event streams.
///
/// Declaration order is the tie-break order used when merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamType {
    Deposit,
    Withdrawal,
    Transfer,
}

impl StreamType {
    pub const ALL: [StreamType; 3] = [
        StreamType::Deposit,
        StreamType::Withdrawal,
        StreamType::Transfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Deposit => "DEPOSIT",
            StreamType::Withdrawal => "WITHDRAWAL",
            StreamType::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(StreamType::Deposit),
            "WITHDRAWAL" => Ok(StreamType::Withdrawal),
            "TRANSFER" => Ok(StreamType::Transfer),
            other => Err(format!("unknown stream type: {}", other)),
        }
    }
}
