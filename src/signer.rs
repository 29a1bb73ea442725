//! The wallet seam.
//!
//! The orchestrator treats signing as opaque: it hands a transaction request
//! to a [`WalletSigner`] and gets back a transaction hash (or a rejection).
//! The mobile app binds this to its wallet UI; the CLI binds it to a local
//! private key.

use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, B256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use std::collections::HashMap;
use url::Url;

use abipago_types::chain::ChainRef;

/// Why a signature request did not produce a transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The user declined the signing prompt. Terminal for the payment.
    #[error("user rejected the signature request")]
    Rejected,
    #[error("signing failed: {0}")]
    Other(String),
}

/// An opaque signer: transaction request in, transaction hash out.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The wallet address transactions are sent from.
    fn address(&self) -> Address;

    /// Signs and broadcasts `tx` on `chain`, returning the transaction hash
    /// once the transaction has been accepted by the node.
    async fn send_transaction(
        &self,
        chain: ChainRef,
        tx: TransactionRequest,
    ) -> Result<B256, SignerError>;
}

/// A [`WalletSigner`] backed by a local private key, holding a wallet-filled
/// provider per configured chain.
pub struct LocalWalletSigner {
    address: Address,
    providers: HashMap<ChainRef, DynProvider>,
}

impl LocalWalletSigner {
    /// Builds a signer from a hex-encoded private key and the configured
    /// per-chain RPC endpoints.
    pub fn from_private_key(
        private_key: &str,
        rpc: &HashMap<ChainRef, Url>,
    ) -> Result<Self, SignerError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|_| SignerError::Other("invalid private key".into()))?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let providers = rpc
            .iter()
            .map(|(chain, url)| {
                let provider = ProviderBuilder::new()
                    .wallet(wallet.clone())
                    .connect_http(url.clone())
                    .erased();
                (*chain, provider)
            })
            .collect();

        Ok(Self { address, providers })
    }
}

#[async_trait]
impl WalletSigner for LocalWalletSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(
        &self,
        chain: ChainRef,
        tx: TransactionRequest,
    ) -> Result<B256, SignerError> {
        let provider = self
            .providers
            .get(&chain)
            .ok_or_else(|| SignerError::Other(format!("no signing provider for chain {chain}")))?;
        let tx = tx.with_from(self.address);
        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|err| SignerError::Other(err.to_string()))?;
        Ok(*pending.tx_hash())
    }
}
