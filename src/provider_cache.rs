//! Per-chain JSON-RPC provider cache.
//!
//! Providers are constructed once from configuration and read-only
//! thereafter. They are type-erased so the rest of the orchestrator never
//! carries the filler-stack type parameters around.

use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use std::collections::HashMap;

use abipago_types::chain::ChainRef;

use crate::config::Config;

/// A generic map of pre-initialized providers keyed by chain.
///
/// Abstracting over the concrete cache keeps the profile resolver, driver,
/// and history reader testable against hand-assembled maps.
pub trait ProviderMap {
    type Value;

    /// Returns the provider for the chain, if configured.
    fn by_chain(&self, chain: ChainRef) -> Option<&Self::Value>;
}

/// A cache of pre-initialized providers keyed by chain.
#[derive(Clone, Default)]
pub struct ProviderCache {
    providers: HashMap<ChainRef, DynProvider>,
}

impl ProviderCache {
    /// An empty cache; providers are added with [`ProviderCache::insert`].
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registers a provider for a chain, replacing any existing one.
    pub fn insert(&mut self, chain: ChainRef, provider: DynProvider) {
        self.providers.insert(chain, provider);
    }

    /// Connects a read-side provider for every chain with a configured RPC
    /// endpoint.
    pub fn from_config(config: &Config) -> Self {
        let mut providers = HashMap::new();
        for (chain, url) in &config.rpc {
            let provider = ProviderBuilder::new().connect_http(url.clone()).erased();
            providers.insert(*chain, provider);
            tracing::info!(chain = %chain, rpc_url = %url, "Initialized provider");
        }
        Self { providers }
    }

    /// Chains with a configured provider.
    pub fn chains(&self) -> impl Iterator<Item = ChainRef> + '_ {
        self.providers.keys().copied()
    }
}

impl ProviderMap for ProviderCache {
    type Value = DynProvider;

    fn by_chain(&self, chain: ChainRef) -> Option<&DynProvider> {
        self.providers.get(&chain)
    }
}
