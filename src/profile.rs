//! Merchant payment profiles from the naming system.
//!
//! A merchant publishes payment preferences as text records under their
//! name: `pay.receiver`, `pay.chainId`, and `pay.token` are required;
//! `pay.slippageBps`, `pay.tipBps`, `pay.memo`, `pay.expirySec`, and
//! `pay.router` are optional. Records are fetched in parallel. If any
//! required record is missing the name simply has no payment profile —
//! that is a `None`, not an error — and the scanned QR fields become
//! authoritative. Optional records that fail to parse degrade silently to
//! absent.
//!
//! Forward lookup (name → address), reverse lookup (address → name), and
//! avatar lookup (name → URI) are offered as independent helpers.

use alloy_primitives::{Address, B256, keccak256};
use alloy_provider::DynProvider;
use alloy_sol_types::sol;
use futures_util::future;
use std::str::FromStr;
use tracing::instrument;

use abipago_types::chain::ChainRef;

/// Fallback slippage when the merchant does not publish `pay.slippageBps`.
pub const DEFAULT_SLIPPAGE_BPS: u16 = 50;

const KEY_RECEIVER: &str = "pay.receiver";
const KEY_CHAIN_ID: &str = "pay.chainId";
const KEY_TOKEN: &str = "pay.token";
const KEY_SLIPPAGE_BPS: &str = "pay.slippageBps";
const KEY_TIP_BPS: &str = "pay.tipBps";
const KEY_MEMO: &str = "pay.memo";
const KEY_EXPIRY_SEC: &str = "pay.expirySec";
const KEY_ROUTER: &str = "pay.router";

const PROFILE_KEYS: [&str; 8] = [
    KEY_RECEIVER,
    KEY_CHAIN_ID,
    KEY_TOKEN,
    KEY_SLIPPAGE_BPS,
    KEY_TIP_BPS,
    KEY_MEMO,
    KEY_EXPIRY_SEC,
    KEY_ROUTER,
];

sol!(
    #[sol(rpc)]
    interface INameRegistry {
        function resolver(bytes32 node) external view returns (address);
    }

    #[sol(rpc)]
    interface INameResolver {
        function addr(bytes32 node) external view returns (address);
        function name(bytes32 node) external view returns (string memory);
        function text(bytes32 node, string memory key) external view returns (string memory);
    }
);

/// A merchant's resolved payment preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProfile {
    /// Destination wallet.
    pub receiver: Address,
    /// Settlement chain.
    pub chain: ChainRef,
    /// Desired token on that chain.
    pub token: Address,
    /// Allowed slippage in basis points.
    pub slippage_bps: u16,
    /// Optional tip in basis points.
    pub tip_bps: Option<u16>,
    /// Display string shown to the payer.
    pub memo: Option<String>,
    /// Invoice lifetime hint in seconds.
    pub expiry_sec: Option<u64>,
    /// Settlement router override.
    pub router: Option<Address>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("naming system call failed: {0}")]
    Rpc(String),
}

/// Read-only client of the naming system's registry and resolvers.
pub struct ProfileResolver {
    provider: DynProvider,
    registry: Address,
}

impl ProfileResolver {
    pub fn new(provider: DynProvider, registry: Address) -> Self {
        Self { provider, registry }
    }

    /// Resolves the payment profile published under `name`.
    ///
    /// Returns `Ok(None)` when the name has no resolver or any of the three
    /// required records is missing or unparseable.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn payment_profile(&self, name: &str) -> Result<Option<PaymentProfile>, ProfileError> {
        let node = namehash(name);
        let resolver = match self.resolver_for(node).await? {
            Some(resolver) => resolver,
            None => return Ok(None),
        };

        let resolver = INameResolver::new(resolver, self.provider.clone());
        let fetches = PROFILE_KEYS.iter().map(|key| {
            let resolver = resolver.clone();
            async move {
                match resolver.text(node, key.to_string()).call().await {
                    Ok(value) if !value.is_empty() => Some(value),
                    Ok(_) => None,
                    Err(err) => {
                        tracing::debug!(key, %err, "text record fetch failed, treating as absent");
                        None
                    }
                }
            }
        });
        let records = future::join_all(fetches).await;
        let record = |key: &str| -> Option<&String> {
            PROFILE_KEYS
                .iter()
                .position(|candidate| *candidate == key)
                .and_then(|index| records[index].as_ref())
        };

        let receiver = record(KEY_RECEIVER).and_then(|v| Address::from_str(v.trim()).ok());
        let chain = record(KEY_CHAIN_ID).and_then(|v| v.trim().parse::<ChainRef>().ok());
        let token = record(KEY_TOKEN).and_then(|v| Address::from_str(v.trim()).ok());
        let (Some(receiver), Some(chain), Some(token)) = (receiver, chain, token) else {
            return Ok(None);
        };

        Ok(Some(PaymentProfile {
            receiver,
            chain,
            token,
            slippage_bps: record(KEY_SLIPPAGE_BPS)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_SLIPPAGE_BPS),
            tip_bps: record(KEY_TIP_BPS).and_then(|v| v.trim().parse().ok()),
            memo: record(KEY_MEMO).cloned(),
            expiry_sec: record(KEY_EXPIRY_SEC).and_then(|v| v.trim().parse().ok()),
            router: record(KEY_ROUTER).and_then(|v| Address::from_str(v.trim()).ok()),
        }))
    }

    /// Forward lookup: name → wallet address.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn resolve_address(&self, name: &str) -> Result<Option<Address>, ProfileError> {
        let node = namehash(name);
        let resolver = match self.resolver_for(node).await? {
            Some(resolver) => resolver,
            None => return Ok(None),
        };
        let address = INameResolver::new(resolver, self.provider.clone())
            .addr(node)
            .call()
            .await
            .map_err(|err| ProfileError::Rpc(err.to_string()))?;
        Ok((address != Address::ZERO).then_some(address))
    }

    /// Reverse lookup: wallet address → primary name.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn reverse_lookup(&self, address: Address) -> Result<Option<String>, ProfileError> {
        let reverse_name = format!("{:x}.addr.reverse", address);
        let node = namehash(&reverse_name);
        let resolver = match self.resolver_for(node).await? {
            Some(resolver) => resolver,
            None => return Ok(None),
        };
        let name = INameResolver::new(resolver, self.provider.clone())
            .name(node)
            .call()
            .await
            .map_err(|err| ProfileError::Rpc(err.to_string()))?;
        Ok((!name.is_empty()).then_some(name))
    }

    /// Avatar lookup: name → avatar URI.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn avatar(&self, name: &str) -> Result<Option<String>, ProfileError> {
        let node = namehash(name);
        let resolver = match self.resolver_for(node).await? {
            Some(resolver) => resolver,
            None => return Ok(None),
        };
        let avatar = INameResolver::new(resolver, self.provider.clone())
            .text(node, "avatar".to_string())
            .call()
            .await
            .map_err(|err| ProfileError::Rpc(err.to_string()))?;
        Ok((!avatar.is_empty()).then_some(avatar))
    }

    /// Resolver registered for `node`, or `None` when the registry has no
    /// entry.
    async fn resolver_for(&self, node: B256) -> Result<Option<Address>, ProfileError> {
        let resolver = INameRegistry::new(self.registry, self.provider.clone())
            .resolver(node)
            .call()
            .await
            .map_err(|err| ProfileError::Rpc(err.to_string()))?;
        Ok((resolver != Address::ZERO).then_some(resolver))
    }
}

/// The naming system's recursive label hash.
///
/// Labels are lowercased before hashing; full UTS-46 normalization is the
/// scanning layer's concern.
pub fn namehash(name: &str) -> B256 {
    if name.is_empty() {
        return B256::ZERO;
    }
    let mut node = B256::ZERO;
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.to_lowercase().as_bytes());
        let mut packed = [0u8; 64];
        packed[..32].copy_from_slice(node.as_slice());
        packed[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(packed);
    }
    node
}
