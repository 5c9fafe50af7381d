//! Starknet JSON-RPC client for historical vault reads.

use super::{DataSourceError, VaultReader};
use crate::domain::Address;
use alloy_primitives::{keccak256, U256};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// JSON-RPC error code for an unknown block.
const BLOCK_NOT_FOUND: i64 = 24;

/// Vault reader backed by `starknet_call`.
#[derive(Debug, Clone)]
pub struct StarknetVaultReader {
    client: Client,
    rpc_url: String,
    contract: Address,
    max_elapsed: Duration,
}

impl StarknetVaultReader {
    /// Create a reader for `contract` on the node at `rpc_url`.
    pub fn new(rpc_url: String, contract: Address) -> Self {
        Self {
            client: Client::new(),
            rpc_url,
            contract,
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Bound the total time spent retrying one call.
    pub fn with_retry_window(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    async fn post_rpc(
        &self,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, DataSourceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&self.rpc_url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(DataSourceError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::Http {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::Parse(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl VaultReader for StarknetVaultReader {
    async fn read_view(
        &self,
        method: &str,
        args: &[String],
        at_block: i64,
    ) -> Result<Vec<String>, DataSourceError> {
        debug!(
            contract = %self.contract,
            method,
            block_number = at_block,
            "Calling vault view"
        );

        let payload = call_payload(self.contract.as_str(), method, args, at_block);
        let response = self.post_rpc(payload).await?;
        parse_call_result(&response, at_block)
    }
}

/// Starknet entry point selector: `keccak256(name)` masked to 250 bits.
pub fn entry_point_selector(name: &str) -> String {
    let mut hash = keccak256(name.as_bytes());
    hash.0[0] &= 0x03;
    format!("0x{:x}", U256::from_be_bytes(hash.0))
}

fn call_payload(contract: &str, method: &str, args: &[String], at_block: i64) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "starknet_call",
        "params": {
            "request": {
                "contract_address": contract,
                "entry_point_selector": entry_point_selector(method),
                "calldata": args
            },
            "block_id": { "block_number": at_block }
        }
    })
}

fn parse_call_result(
    response: &serde_json::Value,
    at_block: i64,
) -> Result<Vec<String>, DataSourceError> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(|v| v.as_i64()).unwrap_or_default();
        if code == BLOCK_NOT_FOUND {
            return Err(DataSourceError::MissingBlock(at_block));
        }
        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(DataSourceError::Rpc { code, message });
    }

    let result = response
        .get("result")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DataSourceError::Parse("Expected result array".to_string()))?;

    result
        .iter()
        .map(|felt| {
            felt.as_str()
                .map(str::to_string)
                .ok_or_else(|| DataSourceError::Parse(format!("Expected felt string, got {}", felt)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matches_known_value() {
        assert_eq!(
            entry_point_selector("transfer"),
            "0x83afd3f4caedc6eebf44246fe54e38c95e3179a5ec9ea81740eca5b482d12e"
        );
    }

    #[test]
    fn test_call_payload_shape() {
        let payload = call_payload("0x42", "total_assets", &[], 812_345);
        assert_eq!(payload["method"], "starknet_call");
        assert_eq!(payload["params"]["block_id"]["block_number"], 812_345);
        assert_eq!(payload["params"]["request"]["contract_address"], "0x42");
        assert_eq!(
            payload["params"]["request"]["entry_point_selector"],
            entry_point_selector("total_assets")
        );
        assert!(payload["params"]["request"]["calldata"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_parse_call_result_valid() {
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": ["0x3e8", "0x0"]
        });
        let felts = parse_call_result(&response, 1).unwrap();
        assert_eq!(felts, vec!["0x3e8".to_string(), "0x0".to_string()]);
    }

    #[test]
    fn test_parse_call_result_errors() {
        let missing = serde_json::json!({
            "error": { "code": 24, "message": "Block not found" }
        });
        assert_eq!(
            parse_call_result(&missing, 9).unwrap_err(),
            DataSourceError::MissingBlock(9)
        );

        let failed = serde_json::json!({
            "error": { "code": 40, "message": "Contract error" }
        });
        assert_eq!(
            parse_call_result(&failed, 9).unwrap_err(),
            DataSourceError::Rpc {
                code: 40,
                message: "Contract error".to_string()
            }
        );

        let garbage = serde_json::json!({ "result": "0x1" });
        assert!(matches!(
            parse_call_result(&garbage, 9),
            Err(DataSourceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_retry_window_gives_up_after_first_failure() {
        // Nothing listens on port 1.
        let reader = StarknetVaultReader::new(
            "http://127.0.0.1:1".to_string(),
            Address::parse("0x42").unwrap(),
        )
        .with_retry_window(Duration::ZERO);

        let started = std::time::Instant::now();
        let err = reader.total_assets(1).await.unwrap_err();
        assert!(matches!(err, DataSourceError::Network(_)), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
