//! Numeric chain references for EVM networks.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A numeric chain id for an EVM network (e.g. `1` for Ethereum mainnet,
/// `42161` for Arbitrum One).
///
/// AbiPago settles exclusively on EVM chains, so the bare EIP-155 chain id
/// is the whole address of a network.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainRef(u64);

impl ChainRef {
    pub const fn new(chain_id: u64) -> Self {
        Self(chain_id)
    }

    /// Returns the numeric chain id.
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ChainRef {
    fn from(chain_id: u64) -> Self {
        Self(chain_id)
    }
}

impl From<ChainRef> for u64 {
    fn from(chain: ChainRef) -> Self {
        chain.0
    }
}

impl Display for ChainRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when parsing a [`ChainRef`] from a string.
#[derive(Debug, thiserror::Error)]
#[error("invalid chain id {0}")]
pub struct ChainRefParseError(String);

impl FromStr for ChainRef {
    type Err = ChainRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chain_id: u64 = s.parse().map_err(|_| ChainRefParseError(s.into()))?;
        Ok(ChainRef(chain_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_numeric_ids() {
        let chain: ChainRef = "42161".parse().unwrap();
        assert_eq!(chain.inner(), 42161);
        assert_eq!(chain.to_string(), "42161");
    }

    #[test]
    fn serializes_as_bare_number() {
        let chain = ChainRef::new(8453);
        assert_eq!(serde_json::to_string(&chain).unwrap(), "8453");
        let back: ChainRef = serde_json::from_str("8453").unwrap();
        assert_eq!(back, chain);
    }

    #[test]
    fn rejects_garbage() {
        assert!("base".parse::<ChainRef>().is_err());
        assert!("-1".parse::<ChainRef>().is_err());
    }
}
