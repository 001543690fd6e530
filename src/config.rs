use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::chain::{Commitment, SolanaRpcConfig};
use crate::settlement::SettlementConfig;
use crate::sync::{retry::RetryPolicy, SyncConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bind_address: String,
    pub solana_rpc_url: String,
    /// Account listed by `GET /api/transactions`
    pub merchant_account: Option<String>,
    /// Solana CLI keypair file; refunds are disabled without it
    pub custodial_keypair_path: Option<String>,
    pub sol_usd_price: rust_decimal::Decimal,

    pub sync_page_size: usize,
    pub sync_concurrency: usize,
    pub sync_max_attempts: u32,
    pub sync_initial_backoff_ms: u64,

    pub rpc_requests_per_second: u32,
    pub rpc_timeout_secs: u64,

    pub confirmation_timeout_secs: u64,
    pub confirmation_poll_ms: u64,
    pub confirmation_commitment: Commitment,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, config::ConfigError> {
        let optional = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            solana_rpc_url: get("SOLANA_RPC_URL")
                .unwrap_or_else(|| "https://rpc.ankr.com/solana_devnet".to_string()),
            merchant_account: optional("MERCHANT_ACCOUNT"),
            custodial_keypair_path: optional("CUSTODIAL_KEYPAIR_PATH"),
            sol_usd_price: parse_or(&get, "SOL_USD_PRICE", rust_decimal::Decimal::ZERO)?,

            sync_page_size: parse_or(&get, "SYNC_PAGE_SIZE", 1000)?,
            sync_concurrency: parse_or(&get, "SYNC_CONCURRENCY", 8)?,
            sync_max_attempts: parse_or(&get, "SYNC_MAX_ATTEMPTS", 5)?,
            sync_initial_backoff_ms: parse_or(&get, "SYNC_INITIAL_BACKOFF_MS", 1000)?,

            rpc_requests_per_second: parse_or(&get, "RPC_REQUESTS_PER_SECOND", 10)?,
            rpc_timeout_secs: parse_or(&get, "RPC_TIMEOUT_SECS", 30)?,

            confirmation_timeout_secs: parse_or(&get, "CONFIRMATION_TIMEOUT_SECS", 60)?,
            confirmation_poll_ms: parse_or(&get, "CONFIRMATION_POLL_MS", 500)?,
            confirmation_commitment: parse_or(&get, "CONFIRMATION_COMMITMENT", Commitment::Processed)?,
        };

        if config.sync_page_size == 0 || config.sync_page_size > 1000 {
            return Err(config::ConfigError::Message(
                "SYNC_PAGE_SIZE must be between 1 and 1000".to_string(),
            ));
        }
        if config.sync_concurrency == 0 || config.rpc_requests_per_second == 0 {
            return Err(config::ConfigError::Message(
                "SYNC_CONCURRENCY and RPC_REQUESTS_PER_SECOND must be positive".to_string(),
            ));
        }
        if config.sol_usd_price.is_sign_negative() {
            return Err(config::ConfigError::Message(
                "SOL_USD_PRICE must not be negative".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn rpc(&self) -> SolanaRpcConfig {
        SolanaRpcConfig {
            rpc_url: self.solana_rpc_url.clone(),
            requests_per_second: self.rpc_requests_per_second,
            request_timeout: Duration::from_secs(self.rpc_timeout_secs),
            ..SolanaRpcConfig::default()
        }
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            page_size: self.sync_page_size,
            concurrency: self.sync_concurrency,
            retry: RetryPolicy {
                max_attempts: self.sync_max_attempts,
                initial_delay: Duration::from_millis(self.sync_initial_backoff_ms),
                ..RetryPolicy::default()
            },
            usd_per_sol: self.sol_usd_price,
        }
    }

    pub fn settlement(&self) -> SettlementConfig {
        SettlementConfig {
            commitment: self.confirmation_commitment,
            poll_interval: Duration::from_millis(self.confirmation_poll_ms),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, config::ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| {
            config::ConfigError::Message(format!("invalid {}={:?}: {}", key, raw, e))
        }),
        _ => Ok(default),
    }
}
