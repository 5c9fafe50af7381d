//! Data source abstraction for point-in-time reads of the vault contract.

use crate::domain::Decimal;
use alloy_primitives::U256;
use async_trait::async_trait;
use std::fmt;

pub mod mock;
pub mod starknet;

pub use mock::MockVaultReader;
pub use starknet::{entry_point_selector, StarknetVaultReader};

/// View returning the vault's total underlying assets.
pub const TOTAL_ASSETS: &str = "total_assets";
/// View returning the vault's total share supply.
pub const TOTAL_SHARES: &str = "total_supply";

/// Historical read access to the vault contract.
///
/// Implementations must retry transient failures themselves; an error
/// returned from here is final for the current run.
#[async_trait]
pub trait VaultReader: Send + Sync + fmt::Debug {
    /// Call a view function at a historical block.
    ///
    /// # Arguments
    /// * `method` - View function name (e.g. "total_assets")
    /// * `args` - Calldata felts, hex encoded
    /// * `at_block` - Block number the state is read at
    ///
    /// # Returns
    /// The raw felts returned by the call, hex encoded
    async fn read_view(
        &self,
        method: &str,
        args: &[String],
        at_block: i64,
    ) -> Result<Vec<String>, DataSourceError>;

    /// Total assets held by the vault at `at_block`.
    async fn total_assets(&self, at_block: i64) -> Result<Decimal, DataSourceError> {
        let felts = self.read_view(TOTAL_ASSETS, &[], at_block).await?;
        decode_u256(&felts)
    }

    /// Total shares issued by the vault at `at_block`.
    async fn total_shares(&self, at_block: i64) -> Result<Decimal, DataSourceError> {
        let felts = self.read_view(TOTAL_SHARES, &[], at_block).await?;
        decode_u256(&felts)
    }
}

/// Error type for data source operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    Network(String),
    /// HTTP error (e.g., 5xx server error)
    Http { status: u16, message: String },
    /// JSON-RPC error object returned by the node
    Rpc { code: i64, message: String },
    /// Parsing error (invalid JSON or malformed felts)
    Parse(String),
    /// Rate limit exceeded and retries exhausted
    RateLimited,
    /// The node does not know the requested block
    MissingBlock(i64),
    /// Value does not fit the decimal range
    Overflow(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::Network(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::Http { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::Rpc { code, message } => {
                write!(f, "RPC error {}: {}", code, message)
            }
            DataSourceError::Parse(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::MissingBlock(block) => write!(f, "Block {} not found", block),
            DataSourceError::Overflow(value) => {
                write!(f, "Value {} exceeds the decimal range", value)
            }
        }
    }
}

impl std::error::Error for DataSourceError {}

/// Decode a Cairo `u256` returned as `(low, high)` felts.
///
/// A single felt is accepted as a value that fits in the low half.
pub fn decode_u256(felts: &[String]) -> Result<Decimal, DataSourceError> {
    let (low, high) = match felts {
        [low] => (parse_felt(low)?, U256::ZERO),
        [low, high, ..] => (parse_felt(low)?, parse_felt(high)?),
        [] => return Err(DataSourceError::Parse("empty call result".to_string())),
    };

    let half = U256::from(u128::MAX);
    if low > half || high > half {
        return Err(DataSourceError::Parse(format!(
            "u256 limb out of range: low=0x{:x}, high=0x{:x}",
            low, high
        )));
    }

    let value = (high << 128usize) | low;
    let digits = value.to_string();
    // Decimal mantissas are 96 bits wide.
    if value >= U256::from(1u8) << 96usize {
        return Err(DataSourceError::Overflow(digits));
    }
    Decimal::from_str_canonical(&digits).map_err(|_| DataSourceError::Overflow(digits))
}

fn parse_felt(raw: &str) -> Result<U256, DataSourceError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    U256::from_str_radix(digits, 16)
        .map_err(|e| DataSourceError::Parse(format!("invalid felt {}: {}", raw, e)))
}
