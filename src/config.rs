use crate::constants::{
    DEFAULT_MAX_CONCURRENT_USERS, DEFAULT_MAX_TRANSACTION_RETRIES, DEFAULT_QUOTE_FIELD,
    DEFAULT_QUOTE_TIMEOUT_MS, DEFAULT_RETRY_DELAY_MS, DEFAULT_SETTLEMENT_WAIT_MS, USDT,
    VISOR_ETH_USDT_VAULT, VISOR_QUOTE_ENDPOINT, WETH,
};
use crate::error::{AggregatorError, Result};
use crate::models::{AssetPairAmount, RebalancerId, UserTarget};
use crate::quote_source::{HttpQuoteSource, QuoteSource};
use crate::retry::RetryPolicy;
use alloy_primitives::{Address, U256};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Http,
    Ipc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentMode {
    Development,
    Production,
}

/// Whether the run deploys its own vault or reuses one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultAddressing {
    Deploy,
    Existing { factory: Address, vault: Address },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSourceConfig {
    pub rebalancer_id: RebalancerId,
    pub endpoint: String,
    pub field: String,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub provider: String,
    pub provider_type: ProviderType,
    pub environment: EnvironmentMode,
    pub vault_addressing: VaultAddressing,
    pub settlement_wait: Duration,
    pub users: Vec<UserTarget>,
    pub quote_sources: Vec<QuoteSourceConfig>,
    pub quote_timeout: Duration,
    pub default_rebalancer: RebalancerId,
    pub vault_config_id: Address,
    pub token_a: Address,
    pub token_b: Address,
    pub min_liquidity: U256,
    pub max_concurrent_users: usize,
    pub max_transaction_retries: u32,
    pub retry_delay_ms: u64,
}

impl RunConfig {
    /// Development-mode configuration with every tunable at its default.
    pub fn new(provider: impl Into<String>, users: Vec<UserTarget>) -> Self {
        Self {
            provider: provider.into(),
            provider_type: ProviderType::Http,
            environment: EnvironmentMode::Development,
            vault_addressing: VaultAddressing::Deploy,
            settlement_wait: Duration::from_millis(DEFAULT_SETTLEMENT_WAIT_MS),
            users,
            quote_sources: vec![QuoteSourceConfig {
                rebalancer_id: RebalancerId::Visor,
                endpoint: VISOR_QUOTE_ENDPOINT.to_string(),
                field: DEFAULT_QUOTE_FIELD.to_string(),
            }],
            quote_timeout: Duration::from_millis(DEFAULT_QUOTE_TIMEOUT_MS),
            default_rebalancer: RebalancerId::Visor,
            vault_config_id: VISOR_ETH_USDT_VAULT,
            token_a: WETH,
            token_b: USDT,
            min_liquidity: U256::ZERO,
            max_concurrent_users: DEFAULT_MAX_CONCURRENT_USERS,
            max_transaction_retries: DEFAULT_MAX_TRANSACTION_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = get("PROVIDER")
            .ok_or_else(|| AggregatorError::ConfigurationError("PROVIDER is undefined".to_string()))?;

        let provider_type = match get("PROVIDER_TYPE").as_deref().unwrap_or("http") {
            "http" => ProviderType::Http,
            "ipc" => ProviderType::Ipc,
            other => {
                return Err(AggregatorError::ConfigurationError(format!(
                    "Unrecognized PROVIDER_TYPE == {}",
                    other
                )))
            }
        };

        let environment = match get("NODE_ENV").as_deref().unwrap_or("development") {
            "development" => EnvironmentMode::Development,
            "production" => EnvironmentMode::Production,
            other => {
                return Err(AggregatorError::ConfigurationError(format!(
                    "Unrecognized NODE_ENV == {}",
                    other
                )))
            }
        };

        let vault_addressing = match environment {
            EnvironmentMode::Development => VaultAddressing::Deploy,
            EnvironmentMode::Production => VaultAddressing::Existing {
                factory: required_address(&get, "AGGREGATOR_VAULT_FACTORY_ADDRESS")?,
                vault: required_address(&get, "AGGREGATOR_VAULT_ADDRESS")?,
            },
        };

        let users = match get("RUN_USERS") {
            Some(raw) => parse_users(&raw)?,
            None => default_users(),
        };

        let mut quote_sources = vec![QuoteSourceConfig {
            rebalancer_id: RebalancerId::Visor,
            endpoint: get("QUOTE_ENDPOINT_VISOR").unwrap_or_else(|| VISOR_QUOTE_ENDPOINT.to_string()),
            field: get("QUOTE_FIELD_VISOR").unwrap_or_else(|| DEFAULT_QUOTE_FIELD.to_string()),
        }];
        if let Some(endpoint) = get("QUOTE_ENDPOINT_CHARM") {
            quote_sources.push(QuoteSourceConfig {
                rebalancer_id: RebalancerId::Charm,
                endpoint,
                field: get("QUOTE_FIELD_CHARM").unwrap_or_else(|| DEFAULT_QUOTE_FIELD.to_string()),
            });
        }

        let config = Self {
            provider,
            provider_type,
            environment,
            vault_addressing,
            settlement_wait: Duration::from_millis(parse_or(
                &get,
                "SETTLEMENT_WAIT_MS",
                DEFAULT_SETTLEMENT_WAIT_MS,
            )?),
            users,
            quote_sources,
            quote_timeout: Duration::from_millis(parse_or(
                &get,
                "QUOTE_TIMEOUT_MS",
                DEFAULT_QUOTE_TIMEOUT_MS,
            )?),
            default_rebalancer: parse_or(&get, "DEFAULT_REBALANCER", RebalancerId::Visor)?,
            vault_config_id: parse_or(&get, "VAULT_CONFIG_ID", VISOR_ETH_USDT_VAULT)?,
            token_a: parse_or(&get, "TOKEN_A", WETH)?,
            token_b: parse_or(&get, "TOKEN_B", USDT)?,
            min_liquidity: parse_or(&get, "MIN_LIQUIDITY", U256::ZERO)?,
            max_concurrent_users: parse_or(
                &get,
                "MAX_CONCURRENT_USERS",
                DEFAULT_MAX_CONCURRENT_USERS,
            )?,
            max_transaction_retries: parse_or(
                &get,
                "MAX_TRANSACTION_RETRIES",
                DEFAULT_MAX_TRANSACTION_RETRIES,
            )?,
            retry_delay_ms: parse_or(&get, "RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(AggregatorError::ConfigurationError(
                "PROVIDER is undefined".to_string(),
            ));
        }
        if self.users.is_empty() {
            return Err(AggregatorError::ConfigurationError(
                "No users configured for the run".to_string(),
            ));
        }
        if self.max_concurrent_users == 0 {
            return Err(AggregatorError::ConfigurationError(
                "MAX_CONCURRENT_USERS must be at least 1".to_string(),
            ));
        }
        if self.token_a == self.token_b {
            return Err(AggregatorError::ConfigurationError(
                "TOKEN_A and TOKEN_B must differ".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for target in &self.users {
            if !seen.insert(target.user) {
                return Err(AggregatorError::ConfigurationError(format!(
                    "User {} listed more than once",
                    target.user
                )));
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_transaction_retries, self.retry_delay_ms)
    }

    /// One HTTP adapter per configured rebalancer endpoint.
    pub fn build_quote_sources(&self) -> Result<Vec<Arc<dyn QuoteSource>>> {
        self.quote_sources
            .iter()
            .map(|source| {
                HttpQuoteSource::new(
                    source.rebalancer_id,
                    source.endpoint.clone(),
                    source.field.clone(),
                    self.quote_timeout,
                )
                .map(|adapter| Arc::new(adapter) as Arc<dyn QuoteSource>)
            })
            .collect()
    }
}

/// The two simulated accounts funded when no user list is configured:
/// `(1, 4000)` and `(10, 40000)`.
pub fn default_users() -> Vec<UserTarget> {
    vec![
        UserTarget {
            user: Address::with_last_byte(1),
            amounts: AssetPairAmount::new(U256::from(1), U256::from(4000)),
        },
        UserTarget {
            user: Address::with_last_byte(2),
            amounts: AssetPairAmount::new(U256::from(10), U256::from(40000)),
        },
    ]
}

/// Parse `address:amountA:amountB` entries separated by commas.
pub fn parse_users(raw: &str) -> Result<Vec<UserTarget>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [user, amount_a, amount_b] = parts.as_slice() else {
                return Err(AggregatorError::ConfigurationError(format!(
                    "Invalid RUN_USERS entry: {}",
                    entry
                )));
            };

            Ok(UserTarget {
                user: parse_value("RUN_USERS", user)?,
                amounts: AssetPairAmount::new(
                    parse_value("RUN_USERS", amount_a)?,
                    parse_value("RUN_USERS", amount_b)?,
                ),
            })
        })
        .collect()
}

fn required_address<G>(get: &G, key: &str) -> Result<Address>
where
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key).ok_or_else(|| {
        AggregatorError::ConfigurationError(format!("You must set contract address {}", key))
    })?;
    parse_value(key, &raw)
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AggregatorError::ConfigurationError(format!("Invalid {}: {}", key, raw)))
}
