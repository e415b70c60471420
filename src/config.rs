//! Configuration for the custody service.
//!
//! A JSON file (path from `--config` / `CONFIG`, default `config.json`) is
//! deserialized with env-var interpolation: any string field may be a
//! literal, `$VAR`, or `${VAR}`. `.env` values are loaded before parsing.

use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::chain::{Chain, ChainRegistry, ChainType};
use crate::error::Error;
use crate::keystore::encryptor::Encryptor;

/// CLI arguments for the vault0 service.
#[derive(Parser, Debug)]
#[command(name = "vault0")]
#[command(about = "Custodial multi-chain wallet service")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// A transparent wrapper that resolves environment variables during
/// deserialization.
///
/// Supports literal values (`"https://rpc.example"`), `$VAR`, and `${VAR}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    /// Consume the wrapper and return the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if s.starts_with("${") && s.ends_with('}') {
            Some(s[2..s.len() - 1].to_string())
        } else if s.starts_with('$') && s.len() > 1 {
            let var_name = &s[1..];
            if var_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Some(var_name.to_string())
            } else {
                None
            }
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?
        } else {
            s
        };
        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("failed to parse value: {e}")))?;
        Ok(LiteralOrEnv(parsed))
    }
}

/// Per-chain connection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: LiteralOrEnv<Url>,
    /// Chain id override; defaults to the canonical id for the chain.
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Default gas price in wei.
    #[serde(default)]
    pub default_gas_price: Option<u128>,
    /// Default gas limit.
    #[serde(default)]
    pub default_gas_limit: Option<u64>,
    /// Block-explorer API endpoint.
    pub explorer_url: LiteralOrEnv<Url>,
    /// Explorer API key.
    #[serde(default)]
    pub api_key: Option<LiteralOrEnv<String>>,
}

/// Vault polling-job intervals.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// Deployment-monitor interval, seconds.
    #[serde(default = "config_defaults::deployment_interval")]
    pub deployment_update_interval_seconds: u64,
    /// Recovery-executor interval, seconds.
    #[serde(default = "config_defaults::recovery_interval")]
    pub recovery_update_interval_seconds: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            deployment_update_interval_seconds: config_defaults::deployment_interval(),
            recovery_update_interval_seconds: config_defaults::recovery_interval(),
        }
    }
}

/// Transaction-monitoring knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    /// Pause between per-wallet history re-syncs, seconds.
    #[serde(default = "config_defaults::history_sync_interval")]
    pub history_sync_interval_seconds: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            history_sync_interval_seconds: config_defaults::history_sync_interval(),
        }
    }
}

mod config_defaults {
    use std::path::PathBuf;

    pub fn deployment_interval() -> u64 {
        15
    }
    pub fn recovery_interval() -> u64 {
        60
    }
    pub fn history_sync_interval() -> u64 {
        600
    }
    pub fn db_path() -> PathBuf {
        PathBuf::from("vault0.db")
    }
    pub fn contracts_path() -> PathBuf {
        PathBuf::from("contracts")
    }
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base64-encoded AES master key for the keystore. Required.
    pub db_encryption_key: LiteralOrEnv<String>,
    /// SQLite database file.
    #[serde(default = "config_defaults::db_path")]
    pub db_path: PathBuf,
    /// Filesystem root for compiled contract artifacts.
    #[serde(default = "config_defaults::contracts_path")]
    pub smart_contracts_path: PathBuf,
    /// Enabled chains.
    #[serde(default)]
    pub blockchains: HashMap<ChainType, BlockchainConfig>,
    /// Vault job intervals.
    #[serde(default)]
    pub vault: VaultConfig,
    /// Transaction-monitoring knobs.
    #[serde(default)]
    pub transaction: TransactionConfig,
}

impl Config {
    /// Load configuration from the CLI-selected file.
    pub fn load() -> Result<Self, Error> {
        let args = CliArgs::parse();
        Self::from_file(&args.config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::InvalidInput(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidInput(format!("bad config: {e}")))
    }

    /// Build the keystore encryptor from `db_encryption_key`.
    ///
    /// A missing or malformed key is a fatal startup error.
    pub fn encryptor(&self) -> Result<Encryptor, Error> {
        Encryptor::from_base64(&self.db_encryption_key)
    }

    /// Build the chain registry from the `blockchains` section.
    pub fn chain_registry(&self) -> ChainRegistry {
        let chains = self.blockchains.iter().map(|(chain_type, chain_config)| Chain {
            chain_type: *chain_type,
            chain_id: chain_config.chain_id.unwrap_or_else(|| chain_type.chain_id()),
            name: chain_type.to_string(),
            symbol: Chain::default_symbol(*chain_type).to_string(),
            rpc_url: chain_config.rpc_url.clone().into_inner(),
            explorer_url: chain_config.explorer_url.clone().into_inner(),
            explorer_api_key: chain_config
                .api_key
                .clone()
                .map(LiteralOrEnv::into_inner),
            default_gas_price: chain_config.default_gas_price.unwrap_or(20_000_000_000),
            default_gas_limit: chain_config.default_gas_limit.unwrap_or(21_000),
        });
        ChainRegistry::new(chains)
    }

    /// Deployment-monitor interval.
    pub fn deployment_interval(&self) -> Duration {
        Duration::from_secs(self.vault.deployment_update_interval_seconds)
    }

    /// Recovery-executor interval.
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.vault.recovery_update_interval_seconds)
    }

    /// History re-sync interval.
    pub fn history_sync_interval(&self) -> Duration {
        Duration::from_secs(self.transaction.history_sync_interval_seconds)
    }
}
