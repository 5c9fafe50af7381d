//! Mock vault reader for testing without network calls.

use super::{DataSourceError, VaultReader, TOTAL_ASSETS, TOTAL_SHARES};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mock reader that serves predefined vault state per block.
#[derive(Debug, Clone, Default)]
pub struct MockVaultReader {
    // block -> (total_assets, total_shares)
    states: HashMap<i64, (u128, u128)>,
    failures: HashMap<i64, DataSourceError>,
    calls: Arc<AtomicUsize>,
}

impl MockVaultReader {
    /// Create a new mock reader with no state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `assets` / `shares` at `block`.
    pub fn with_block(mut self, block: i64, assets: u128, shares: u128) -> Self {
        self.states.insert(block, (assets, shares));
        self
    }

    /// Fail every read at `block` with `error`.
    pub fn with_failure(mut self, block: i64, error: DataSourceError) -> Self {
        self.failures.insert(block, error);
        self
    }

    /// Number of `read_view` calls served so far, across clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VaultReader for MockVaultReader {
    async fn read_view(
        &self,
        method: &str,
        _args: &[String],
        at_block: i64,
    ) -> Result<Vec<String>, DataSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.failures.get(&at_block) {
            return Err(error.clone());
        }
        let (assets, shares) = self
            .states
            .get(&at_block)
            .copied()
            .ok_or(DataSourceError::MissingBlock(at_block))?;

        let value = match method {
            TOTAL_ASSETS => assets,
            TOTAL_SHARES => shares,
            other => {
                return Err(DataSourceError::Rpc {
                    code: 21,
                    message: format!("Requested entrypoint does not exist: {}", other),
                })
            }
        };
        Ok(vec![format!("0x{:x}", value), "0x0".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Decimal;

    #[tokio::test]
    async fn test_mock_reader_serves_state() {
        let mock = MockVaultReader::new().with_block(10, 1_100, 1_000);
        assert_eq!(mock.total_assets(10).await.unwrap(), Decimal::from_i64(1_100));
        assert_eq!(mock.total_shares(10).await.unwrap(), Decimal::from_i64(1_000));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_reader_unknown_block() {
        let mock = MockVaultReader::new();
        assert_eq!(
            mock.total_assets(3).await.unwrap_err(),
            DataSourceError::MissingBlock(3)
        );
    }

    #[tokio::test]
    async fn test_mock_reader_injected_failure() {
        let mock = MockVaultReader::new()
            .with_block(5, 1, 1)
            .with_failure(5, DataSourceError::RateLimited);
        assert_eq!(
            mock.total_shares(5).await.unwrap_err(),
            DataSourceError::RateLimited
        );
    }

    #[tokio::test]
    async fn test_mock_reader_unknown_method() {
        let mock = MockVaultReader::new().with_block(1, 1, 1);
        let err = mock.read_view("balance_of", &[], 1).await.unwrap_err();
        assert!(matches!(err, DataSourceError::Rpc { code: 21, .. }));
    }
}
