//! Chain registry: supported EVM networks and their parameters.
//!
//! Every supported chain shares the EVM crypto parameters (ECDSA over
//! secp256k1); what varies is the chain id, endpoints, and gas defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use url::Url;

use crate::error::Error;
use crate::keystore::{Curve, KeyFamily};

/// Supported EVM-compatible networks.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainType {
    /// Ethereum mainnet (chain ID 1).
    #[serde(rename = "ethereum")]
    Ethereum,
    /// Polygon PoS (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
}

impl ChainType {
    /// Return the canonical chain ID for the network.
    pub fn chain_id(&self) -> u64 {
        match self {
            ChainType::Ethereum => 1,
            ChainType::Polygon => 137,
            ChainType::Base => 8453,
        }
    }

    /// Return all known [`ChainType`] variants.
    pub fn variants() -> &'static [ChainType] {
        &[ChainType::Ethereum, ChainType::Polygon, ChainType::Base]
    }
}

impl Display for ChainType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainType::Ethereum => write!(f, "ethereum"),
            ChainType::Polygon => write!(f, "polygon"),
            ChainType::Base => write!(f, "base"),
        }
    }
}

impl FromStr for ChainType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(ChainType::Ethereum),
            "polygon" => Ok(ChainType::Polygon),
            "base" => Ok(ChainType::Base),
            other => Err(Error::ChainNotSupported(other.to_string())),
        }
    }
}

/// Full parameter set for one configured chain.
#[derive(Debug, Clone)]
pub struct Chain {
    /// Which network these parameters describe.
    pub chain_type: ChainType,
    /// Numeric chain id used for EIP-155 signing.
    pub chain_id: u64,
    /// Human-readable network name.
    pub name: String,
    /// Native currency symbol.
    pub symbol: String,
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Block-explorer API endpoint.
    pub explorer_url: Url,
    /// Explorer API key, if the endpoint requires one.
    pub explorer_api_key: Option<String>,
    /// Gas price applied when a transaction does not specify one, in wei.
    pub default_gas_price: u128,
    /// Gas limit applied when a transaction does not specify one.
    pub default_gas_limit: u64,
}

impl Chain {
    /// Key family used for wallets on this chain.
    pub fn key_family(&self) -> KeyFamily {
        KeyFamily::Ecdsa
    }

    /// Curve used for wallets on this chain.
    pub fn curve(&self) -> Curve {
        Curve::Secp256k1
    }

    /// Default symbol for a network.
    pub fn default_symbol(chain_type: ChainType) -> &'static str {
        match chain_type {
            ChainType::Ethereum => "ETH",
            ChainType::Polygon => "POL",
            ChainType::Base => "ETH",
        }
    }
}

/// Registry of configured chains, keyed by [`ChainType`].
///
/// Built once at startup from configuration and treated as read-only after.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<ChainType, Chain>,
}

impl ChainRegistry {
    /// Build a registry from already-validated chain descriptors.
    pub fn new(chains: impl IntoIterator<Item = Chain>) -> Self {
        Self {
            chains: chains
                .into_iter()
                .map(|chain| (chain.chain_type, chain))
                .collect(),
        }
    }

    /// Look up the parameters for a chain.
    ///
    /// # Errors
    /// Returns [`Error::ChainNotSupported`] when the chain is not configured.
    pub fn get(&self, chain_type: ChainType) -> Result<&Chain, Error> {
        self.chains
            .get(&chain_type)
            .ok_or_else(|| Error::ChainNotSupported(chain_type.to_string()))
    }

    /// Iterate over all configured chains.
    pub fn iter(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }

    /// Number of configured chains.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Whether no chains are configured.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
