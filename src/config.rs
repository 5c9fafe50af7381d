use crate::domain::Address;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub rpc_url: String,
    /// Total time spent retrying one RPC call.
    pub rpc_retry_window: Duration,
    pub network: Network,
    pub vault_address: Address,
    /// Protocol share of vault yield, in basis points.
    pub protocol_commission_bps: u32,
    pub rate_sampling: RateSamplingConfig,
    pub referrers_file: String,
}

/// Batching and pacing of historical exchange-rate reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSamplingConfig {
    /// Samples buffered before a flush.
    pub batch_size: usize,
    /// Reads between two pauses.
    pub pacing_every: usize,
    pub pacing_delay: Duration,
}

impl Default for RateSamplingConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            pacing_every: 25,
            pacing_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Sepolia,
}

impl Network {
    /// Deployed vault contract on this network.
    pub fn default_vault_address(&self) -> &'static str {
        match self {
            Network::Mainnet => "0x28d709c875c0ceac3dce7065bec5328186dc89fe254527084d1689910954b0a",
            Network::Sepolia => "0x42de5b868da876768213c48019b8d46cd484e66013ae3275f8a4b97b31fc7eb",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Sepolia => f.write_str("sepolia"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = required(&env_map, "DATABASE_PATH")?;
        let rpc_url = required(&env_map, "RPC_URL")?;

        let network = match required(&env_map, "NETWORK")?.as_str() {
            "mainnet" => Network::Mainnet,
            "sepolia" => Network::Sepolia,
            other => {
                return Err(ConfigError::InvalidValue(
                    "NETWORK".to_string(),
                    format!("must be mainnet or sepolia, got {}", other),
                ))
            }
        };

        let vault_raw = env_map
            .get("VAULT_ADDRESS")
            .map(|s| s.as_str())
            .unwrap_or_else(|| network.default_vault_address());
        let vault_address = Address::parse(vault_raw)
            .map_err(|e| ConfigError::InvalidValue("VAULT_ADDRESS".to_string(), e.to_string()))?;

        let protocol_commission_bps = parse_or(
            &env_map,
            "PROTOCOL_COMMISSION_BPS",
            1500u32,
            "must be basis points in 0..=10000",
        )?;
        if protocol_commission_bps > 10_000 {
            return Err(ConfigError::InvalidValue(
                "PROTOCOL_COMMISSION_BPS".to_string(),
                "must be basis points in 0..=10000".to_string(),
            ));
        }

        let defaults = RateSamplingConfig::default();
        let batch_size = parse_or(
            &env_map,
            "RATE_BATCH_SIZE",
            defaults.batch_size,
            "must be a positive integer",
        )?;
        let pacing_every = parse_or(
            &env_map,
            "RATE_PACING_EVERY",
            defaults.pacing_every,
            "must be a positive integer",
        )?;
        for (key, value) in [("RATE_BATCH_SIZE", batch_size), ("RATE_PACING_EVERY", pacing_every)] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must be a positive integer".to_string(),
                ));
            }
        }
        let pacing_delay_ms = parse_or(
            &env_map,
            "RATE_PACING_DELAY_MS",
            defaults.pacing_delay.as_millis() as u64,
            "must be a valid u64",
        )?;

        let rpc_retry_secs = parse_or(
            &env_map,
            "RPC_RETRY_WINDOW_SECS",
            30u64,
            "must be a valid u64",
        )?;

        let referrers_file = env_map
            .get("REFERRERS_FILE")
            .cloned()
            .unwrap_or_else(|| "./referrers.json".to_string());

        Ok(Config {
            port,
            database_path,
            rpc_url,
            rpc_retry_window: Duration::from_secs(rpc_retry_secs),
            network,
            vault_address,
            protocol_commission_bps,
            rate_sampling: RateSamplingConfig {
                batch_size,
                pacing_every,
                pacing_delay: Duration::from_millis(pacing_delay_ms),
            },
            referrers_file,
        })
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_or<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expected.to_string())),
    }
}
