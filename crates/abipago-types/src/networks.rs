//! Known chains, token deployments, and canonical protocol addresses.
//!
//! The settlement router is deployed at the same address on every supported
//! chain; per-chain overrides come from configuration. Token entries carry
//! the symbol/decimals metadata the history reader and amount formatting
//! rely on.

use alloy_primitives::{Address, address};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::chain::ChainRef;

/// Sentinel address denoting the chain's native asset in payment plans and
/// routing-oracle requests.
pub const NATIVE_SENTINEL: Address = address!("0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");

/// The delegated allowance manager (Permit2). The settlement router grants
/// it a one-time unlimited allowance per token, then issues short-lived
/// bounded approvals to the DEX router through it.
pub const ALLOWANCE_MANAGER: Address = address!("0x000000000022d473030f116ddee9f6b43ac78ba3");

/// Canonical DEX router (Uniswap Universal Router) on the supported chains.
pub const DEX_ROUTER: Address = address!("0x3fc91a3afd70395cd496c647d5a6cc9d4b2b7fad");

/// Default settlement router deployment, identical on every supported chain.
pub const SETTLEMENT_ROUTER: Address = address!("0xab1fa90c84d75f35c176d64ab7be90ca05a94bd7");

/// Chains AbiPago can settle on.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnownChain {
    #[serde(rename = "ethereum")]
    Ethereum,
    #[serde(rename = "optimism")]
    Optimism,
    #[serde(rename = "unichain")]
    Unichain,
    #[serde(rename = "polygon")]
    Polygon,
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "arbitrum")]
    Arbitrum,
}

impl Display for KnownChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KnownChain::Ethereum => "ethereum",
            KnownChain::Optimism => "optimism",
            KnownChain::Unichain => "unichain",
            KnownChain::Polygon => "polygon",
            KnownChain::Base => "base",
            KnownChain::Arbitrum => "arbitrum",
        };
        write!(f, "{name}")
    }
}

impl KnownChain {
    /// Return the numeric chain id associated with the chain.
    pub fn chain_ref(&self) -> ChainRef {
        let chain_id = match self {
            KnownChain::Ethereum => 1,
            KnownChain::Optimism => 10,
            KnownChain::Unichain => 130,
            KnownChain::Polygon => 137,
            KnownChain::Base => 8453,
            KnownChain::Arbitrum => 42161,
        };
        ChainRef::new(chain_id)
    }

    /// Return all known [`KnownChain`] variants.
    pub fn variants() -> &'static [KnownChain] {
        &[
            KnownChain::Ethereum,
            KnownChain::Optimism,
            KnownChain::Unichain,
            KnownChain::Polygon,
            KnownChain::Base,
            KnownChain::Arbitrum,
        ]
    }

    pub fn from_chain_ref(chain: ChainRef) -> Option<KnownChain> {
        Self::variants()
            .iter()
            .copied()
            .find(|candidate| candidate.chain_ref() == chain)
    }

    /// The wrapped-native token on this chain (WETH on the L1/L2s, WPOL on
    /// Polygon). `settleNative` wraps into this token on entry.
    pub fn wrapped_native(&self) -> Address {
        match self {
            KnownChain::Ethereum => address!("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
            KnownChain::Optimism => address!("0x4200000000000000000000000000000000000006"),
            KnownChain::Unichain => address!("0x4200000000000000000000000000000000000006"),
            KnownChain::Polygon => address!("0x0d500b1d8e8ef31e21c99d1db9a6444d3adf1270"),
            KnownChain::Base => address!("0x4200000000000000000000000000000000000006"),
            KnownChain::Arbitrum => address!("0x82af49447d8a07e3bd95bd0d56f35241523fbab1"),
        }
    }
}

/// A token deployment on a specific chain, with the display metadata the
/// history reader and amount formatting need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDeployment {
    pub chain: ChainRef,
    pub address: Address,
    pub symbol: &'static str,
    pub decimals: u8,
}

macro_rules! token {
    ($chain:expr, $address:literal, $symbol:literal, $decimals:literal) => {
        TokenDeployment {
            chain: $chain.chain_ref(),
            address: address!($address),
            symbol: $symbol,
            decimals: $decimals,
        }
    };
}

/// Statically known token deployments across the supported chains.
static KNOWN_TOKENS: Lazy<Vec<TokenDeployment>> = Lazy::new(|| {
    use KnownChain::*;
    let mut tokens = vec![
        token!(Ethereum, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "USDC", 6),
        token!(Ethereum, "0xdac17f958d2ee523a2206206994597c13d831ec7", "USDT", 6),
        token!(Ethereum, "0x6b175474e89094c44da98b954eedeac495271d0f", "DAI", 18),
        token!(Optimism, "0x0b2c639c533813f4aa9d7837caf62653d097ff85", "USDC", 6),
        token!(Unichain, "0x078d782b760474a361dda0af3839290b0ef57ad6", "USDC", 6),
        token!(Polygon, "0x3c499c542cef5e3811e1192ce70d8cc03d5c3359", "USDC", 6),
        token!(Base, "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913", "USDC", 6),
        token!(Arbitrum, "0xaf88d065e77c8cc2239327c5edb3a432268e5831", "USDC", 6),
        token!(Arbitrum, "0xfd086bc7cd5c481dcc9c85ebe478a1c0b69fcbb9", "USDT", 6),
    ];
    for chain in KnownChain::variants() {
        let symbol = match chain {
            Polygon => "WPOL",
            _ => "WETH",
        };
        tokens.push(TokenDeployment {
            chain: chain.chain_ref(),
            address: chain.wrapped_native(),
            symbol,
            decimals: 18,
        });
    }
    tokens
});

/// Looks up a known token deployment by chain and address.
pub fn known_token(chain: ChainRef, token: Address) -> Option<&'static TokenDeployment> {
    KNOWN_TOKENS
        .iter()
        .find(|deployment| deployment.chain == chain && deployment.address == token)
}

/// Looks up a known token deployment by chain and symbol (case-insensitive).
pub fn token_by_symbol(chain: ChainRef, symbol: &str) -> Option<&'static TokenDeployment> {
    KNOWN_TOKENS
        .iter()
        .find(|deployment| deployment.chain == chain && deployment.symbol.eq_ignore_ascii_case(symbol))
}

/// The wrapped-native token for a chain, if the chain is known.
pub fn wrapped_native(chain: ChainRef) -> Option<Address> {
    KnownChain::from_chain_ref(chain).map(|known| known.wrapped_native())
}
