//! Environment-driven configuration for the orchestrator.
//!
//! Environment variables used:
//! - `RPC_URL_ETHEREUM`, `RPC_URL_OPTIMISM`, `RPC_URL_UNICHAIN`,
//!   `RPC_URL_POLYGON`, `RPC_URL_BASE`, `RPC_URL_ARBITRUM` — JSON-RPC
//!   endpoints per chain; chains without an endpoint are skipped.
//! - `ROUTING_API_URL` — routing-oracle origin (default `https://li.quest/v1`).
//! - `ROUTING_INTEGRATOR` — integrator identifier sent on every oracle
//!   request (default `abipago`).
//! - `ENS_REGISTRY` — naming-system registry override.
//! - `SETTLEMENT_ROUTER` — settlement router override applied to every
//!   chain; `SETTLEMENT_ROUTER_<CHAIN>` overrides a single chain.
//! - `EVM_PRIVATE_KEY` — private key for the local wallet signer.

use alloy_primitives::Address;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use url::Url;

use abipago_types::chain::ChainRef;
use abipago_types::networks::{self, KnownChain};

const ENV_ROUTING_API_URL: &str = "ROUTING_API_URL";
const ENV_ROUTING_INTEGRATOR: &str = "ROUTING_INTEGRATOR";
const ENV_ENS_REGISTRY: &str = "ENS_REGISTRY";
const ENV_SETTLEMENT_ROUTER: &str = "SETTLEMENT_ROUTER";
const ENV_EVM_PRIVATE_KEY: &str = "EVM_PRIVATE_KEY";

const DEFAULT_ROUTING_API_URL: &str = "https://li.quest/v1";
const DEFAULT_INTEGRATOR: &str = "abipago";

/// Mainnet registry of the naming system.
const DEFAULT_ENS_REGISTRY: Address =
    alloy_primitives::address!("0x00000000000c2e074ec69a0dfb2997ba6c7d2e1e");

/// Orchestrator configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint per configured chain.
    pub rpc: HashMap<ChainRef, Url>,
    /// Routing-oracle origin.
    pub routing_api: Url,
    /// Integrator identifier carried on every oracle request.
    pub integrator: String,
    /// Naming-system registry address.
    pub ens_registry: Address,
    /// Settlement router per chain (defaults plus overrides).
    routers: HashMap<ChainRef, Address>,
    /// Private key for the local signer, if configured.
    pub private_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("env {var} is not a valid URL: {value}")]
    InvalidUrl { var: String, value: String },
    #[error("env {var} is not a valid address: {value}")]
    InvalidAddress { var: String, value: String },
}

impl Config {
    /// Loads configuration from the environment. Chains without an RPC
    /// endpoint are skipped with a warning; everything else falls back to
    /// the documented defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut rpc = HashMap::new();
        for chain in KnownChain::variants() {
            let var = format!("RPC_URL_{}", chain.to_string().to_uppercase());
            match env::var(&var) {
                Ok(value) => {
                    let url = Url::parse(&value)
                        .map_err(|_| ConfigError::InvalidUrl { var, value })?;
                    rpc.insert(chain.chain_ref(), url);
                }
                Err(_) => {
                    tracing::warn!("No RPC URL configured for {chain} (skipped)");
                }
            }
        }

        let routing_api = match env::var(ENV_ROUTING_API_URL) {
            Ok(value) => Url::parse(&value).map_err(|_| ConfigError::InvalidUrl {
                var: ENV_ROUTING_API_URL.into(),
                value,
            })?,
            Err(_) => Url::parse(DEFAULT_ROUTING_API_URL).expect("default URL is valid"),
        };
        let integrator =
            env::var(ENV_ROUTING_INTEGRATOR).unwrap_or_else(|_| DEFAULT_INTEGRATOR.into());

        let ens_registry = parse_address_env(ENV_ENS_REGISTRY)?.unwrap_or(DEFAULT_ENS_REGISTRY);

        let global_router =
            parse_address_env(ENV_SETTLEMENT_ROUTER)?.unwrap_or(networks::SETTLEMENT_ROUTER);
        let mut routers = HashMap::new();
        for chain in KnownChain::variants() {
            let var = format!("SETTLEMENT_ROUTER_{}", chain.to_string().to_uppercase());
            let router = parse_address_env(&var)?.unwrap_or(global_router);
            routers.insert(chain.chain_ref(), router);
        }

        let private_key = env::var(ENV_EVM_PRIVATE_KEY).ok();

        Ok(Self {
            rpc,
            routing_api,
            integrator,
            ens_registry,
            routers,
            private_key,
        })
    }

    /// The settlement router deployed on `chain`.
    pub fn router_for(&self, chain: ChainRef) -> Address {
        self.routers
            .get(&chain)
            .copied()
            .unwrap_or(networks::SETTLEMENT_ROUTER)
    }
}

fn parse_address_env(var: &str) -> Result<Option<Address>, ConfigError> {
    match env::var(var) {
        Ok(value) => {
            let address =
                Address::from_str(value.trim()).map_err(|_| ConfigError::InvalidAddress {
                    var: var.into(),
                    value,
                })?;
            Ok(Some(address))
        }
        Err(_) => Ok(None),
    }
}
