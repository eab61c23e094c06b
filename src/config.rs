//! Relay configuration, loaded from the environment

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use eyre::{eyre, Result, WrapErr};

use crate::ledger::Timeouts;

/// Coin chain (chain A) binding
#[derive(Clone)]
pub struct CoinConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// `CoinToHPoint` request contract
    pub bridge_address: String,
    pub private_key: String,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for CoinConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoinConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("bridge_address", &self.bridge_address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Point chain (chain B) binding
#[derive(Clone)]
pub struct PointConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// `HPointToCoin` request contract
    pub bridge_address: String,
    /// KIP-7 token proxy that mints points
    pub token_address: String,
    pub private_key: String,
    /// Fixed gas limit for every point-chain transaction
    pub gas_limit: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for PointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("bridge_address", &self.bridge_address)
            .field("token_address", &self.token_address)
            .field("private_key", &"<redacted>")
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

/// Scheduler and cycle settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Tick period of both directions; also sets their phase offset
    pub polling_interval_ms: u64,
    /// Records relayed per cycle
    pub max_batch_size: usize,
    pub read_timeout_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub fast_path_enabled: bool,
    pub event_poll_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 10_000,
            max_batch_size: 100,
            read_timeout_ms: 15_000,
            confirmation_timeout_ms: 120_000,
            fast_path_enabled: true,
            event_poll_interval_ms: 2_000,
        }
    }
}

impl RelayConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: Duration::from_millis(self.read_timeout_ms),
            confirmation: Duration::from_millis(self.confirmation_timeout_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(eyre!("LOG_FORMAT must be 'text' or 'json', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub coin: CoinConfig,
    pub point: PointConfig,
    pub relay: RelayConfig,
    pub api: ApiConfig,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_env()
    }

    /// Read and validate configuration from the process environment only
    pub fn from_env() -> Result<Self> {
        let defaults = RelayConfig::default();

        let coin = CoinConfig {
            rpc_url: required("COIN_RPC_URL")?,
            chain_id: required_parsed("COIN_CHAIN_ID")?,
            bridge_address: required("COIN_BRIDGE_ADDRESS")?,
            private_key: required("COIN_PRIVATE_KEY")?,
        };

        let point = PointConfig {
            rpc_url: required("POINT_RPC_URL")?,
            chain_id: required_parsed("POINT_CHAIN_ID")?,
            bridge_address: required("POINT_BRIDGE_ADDRESS")?,
            token_address: required("POINT_TOKEN_ADDRESS")?,
            private_key: required("POINT_PRIVATE_KEY")?,
            gas_limit: optional("POINT_GAS_LIMIT", 100_000_000)?,
        };

        let relay = RelayConfig {
            polling_interval_ms: optional("POLLING_INTERVAL_MS", defaults.polling_interval_ms)?,
            max_batch_size: optional("MAX_BATCH_SIZE", defaults.max_batch_size)?,
            read_timeout_ms: optional("READ_TIMEOUT_MS", defaults.read_timeout_ms)?,
            confirmation_timeout_ms: optional(
                "CONFIRMATION_TIMEOUT_MS",
                defaults.confirmation_timeout_ms,
            )?,
            fast_path_enabled: optional("FAST_PATH_ENABLED", defaults.fast_path_enabled)?,
            event_poll_interval_ms: optional(
                "EVENT_POLL_INTERVAL_MS",
                defaults.event_poll_interval_ms,
            )?,
        };

        let api = ApiConfig {
            bind_address: env::var("API_BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: optional("API_PORT", 9092)?,
        };

        let log_format = optional("LOG_FORMAT", LogFormat::Text)?;

        let config = Self {
            coin,
            point,
            relay,
            api,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.coin.rpc_url.is_empty() {
            return Err(eyre!("COIN_RPC_URL cannot be empty"));
        }
        if self.point.rpc_url.is_empty() {
            return Err(eyre!("POINT_RPC_URL cannot be empty"));
        }

        check_address("COIN_BRIDGE_ADDRESS", &self.coin.bridge_address)?;
        check_address("POINT_BRIDGE_ADDRESS", &self.point.bridge_address)?;
        check_address("POINT_TOKEN_ADDRESS", &self.point.token_address)?;
        check_private_key("COIN_PRIVATE_KEY", &self.coin.private_key)?;
        check_private_key("POINT_PRIVATE_KEY", &self.point.private_key)?;

        if self.coin.chain_id == self.point.chain_id {
            return Err(eyre!(
                "COIN_CHAIN_ID and POINT_CHAIN_ID must differ (both {})",
                self.coin.chain_id
            ));
        }

        if self.point.gas_limit == 0 {
            return Err(eyre!("POINT_GAS_LIMIT must be greater than 0"));
        }
        if self.relay.polling_interval_ms == 0 {
            return Err(eyre!("POLLING_INTERVAL_MS must be greater than 0"));
        }
        if self.relay.max_batch_size == 0 {
            return Err(eyre!("MAX_BATCH_SIZE must be greater than 0"));
        }
        if self.relay.read_timeout_ms == 0 || self.relay.confirmation_timeout_ms == 0 {
            return Err(eyre!(
                "READ_TIMEOUT_MS and CONFIRMATION_TIMEOUT_MS must be greater than 0"
            ));
        }
        if self.relay.event_poll_interval_ms == 0 {
            return Err(eyre!("EVENT_POLL_INTERVAL_MS must be greater than 0"));
        }

        Ok(())
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

fn required_parsed<T>(name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    required(name)?
        .trim()
        .parse()
        .map_err(|e| eyre!("{} is invalid: {}", name, e))
}

fn optional<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| eyre!("{} is invalid: {}", name, e)),
        _ => Ok(default),
    }
}

fn is_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn check_address(name: &str, value: &str) -> Result<()> {
    match value.strip_prefix("0x") {
        Some(hex) if value.len() == 42 && is_hex(hex) => Ok(()),
        _ => Err(eyre!(
            "{} must be a valid hex address (42 chars with 0x prefix)",
            name
        )),
    }
}

fn check_private_key(name: &str, value: &str) -> Result<()> {
    match value.strip_prefix("0x") {
        Some(hex) if value.len() == 66 && is_hex(hex) => Ok(()),
        _ => Err(eyre!("{} must be 66 chars (0x + 64 hex chars)", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            coin: CoinConfig {
                rpc_url: "http://localhost:8545".to_string(),
                chain_id: 31337,
                bridge_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
                private_key: format!("0x{}", "ac".repeat(32)),
            },
            point: PointConfig {
                rpc_url: "http://localhost:8551".to_string(),
                chain_id: 1001,
                bridge_address: "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512".to_string(),
                token_address: "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0".to_string(),
                private_key: format!("0x{}", "59".repeat(32)),
                gas_limit: 100_000_000,
            },
            relay: RelayConfig::default(),
            api: ApiConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 9092,
            },
            log_format: LogFormat::Text,
        }
    }

    #[test]
    fn test_sample_is_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_private_keys() {
        let config = sample();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&"ac".repeat(32)));
        assert!(!rendered.contains(&"59".repeat(32)));
    }

    #[test]
    fn test_rejects_bad_addresses_and_keys() {
        let mut config = sample();
        config.point.token_address = "0x1234".to_string();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.coin.bridge_address = format!("0x{}", "zz".repeat(20));
        assert!(config.validate().is_err());

        let mut config = sample();
        config.coin.private_key = "ac".repeat(33);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_same_chain_id_and_zero_values() {
        let mut config = sample();
        config.point.chain_id = config.coin.chain_id;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.relay.polling_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.relay.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_defaults() {
        let relay = RelayConfig::default();
        assert_eq!(relay.polling_interval(), Duration::from_secs(10));
        assert_eq!(relay.max_batch_size, 100);
        assert_eq!(relay.timeouts().confirmation, Duration::from_secs(120));
        assert!(relay.fast_path_enabled);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
