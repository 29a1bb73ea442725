//! Event-sourced payment history.
//!
//! There is no database: history is reconstructed purely from the
//! settlement router's `PaymentExecuted` logs. The contract is queried
//! twice — once filtered on the payer topic, once on the receiver topic —
//! then the two result sets are merged, deduplicated by `(tx hash,
//! direction)`, and sorted newest-first by the event's own timestamp.
//! Token display metadata comes from the static registry, falling back to
//! "UNKNOWN" / 18 decimals for unregistered tokens.

use alloy_primitives::{Address, B256, U256};
use alloy_provider::{DynProvider, Provider};
use alloy_rpc_types_eth::{BlockNumberOrTag, Filter, Log};
use alloy_sol_types::SolEvent;
use std::collections::HashSet;
use tracing::instrument;

use abipago_types::abi::ISettlementRouter::PaymentExecuted;
use abipago_types::amount::format_units;
use abipago_types::chain::ChainRef;
use abipago_types::networks;

/// Whether the user paid or got paid.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Sent,
    Received,
}

/// One settled payment, as reconstructed from its on-chain receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub tx_hash: B256,
    pub direction: Direction,
    pub reference: B256,
    pub payer: Address,
    pub receiver: Address,
    pub token_in: Address,
    pub amount_in: U256,
    pub token_out: Address,
    pub amount_out: U256,
    pub fee: U256,
    /// Settlement time as recorded by the contract.
    pub timestamp: u64,
    /// Display metadata for `token_out` from the registry.
    pub token_symbol: String,
    pub token_decimals: u8,
    pub display_amount: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("log query failed: {0}")]
    Rpc(String),
}

/// Reads settlement history for one user on one chain.
pub struct HistoryReader {
    provider: DynProvider,
    chain: ChainRef,
    router: Address,
}

impl HistoryReader {
    pub fn new(provider: DynProvider, chain: ChainRef, router: Address) -> Self {
        Self {
            provider,
            chain,
            router,
        }
    }

    /// All payments the user sent or received, newest first.
    #[instrument(skip(self), fields(user = %user, chain = %self.chain))]
    pub async fn payments_of(&self, user: Address) -> Result<Vec<PaymentRecord>, HistoryError> {
        let sent = self.query(user, Direction::Sent).await?;
        let received = self.query(user, Direction::Received).await?;
        Ok(merge_records(sent, received))
    }

    async fn query(
        &self,
        user: Address,
        direction: Direction,
    ) -> Result<Vec<PaymentRecord>, HistoryError> {
        let filter = Filter::new()
            .address(self.router)
            .event_signature(PaymentExecuted::SIGNATURE_HASH)
            .from_block(BlockNumberOrTag::Earliest);
        // Topic layout: [signature, reference, receiver, payer].
        let filter = match direction {
            Direction::Sent => filter.topic3(user.into_word()),
            Direction::Received => filter.topic2(user.into_word()),
        };
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|err| HistoryError::Rpc(err.to_string()))?;
        Ok(logs
            .iter()
            .filter_map(|log| decode_record(log, self.chain, direction))
            .collect())
    }
}

/// Decodes one `PaymentExecuted` log into a record; undecodable or
/// pending logs are skipped.
fn decode_record(log: &Log, chain: ChainRef, direction: Direction) -> Option<PaymentRecord> {
    let tx_hash = log.transaction_hash?;
    let event = PaymentExecuted::decode_log_data(&log.inner.data).ok()?;

    let (token_symbol, token_decimals) = match networks::known_token(chain, event.tokenOut) {
        Some(deployment) => (deployment.symbol.to_string(), deployment.decimals),
        None => ("UNKNOWN".to_string(), 18),
    };
    let display_amount = format_units(event.amountOut, token_decimals);

    Some(PaymentRecord {
        tx_hash,
        direction,
        reference: event.reference,
        payer: event.payer,
        receiver: event.receiver,
        token_in: event.tokenIn,
        amount_in: event.amountIn,
        token_out: event.tokenOut,
        amount_out: event.amountOut,
        fee: event.fee,
        timestamp: event.timestamp.saturating_to(),
        token_symbol,
        token_decimals,
        display_amount,
    })
}

/// Merges the payer-filtered and receiver-filtered result sets:
/// deduplicate by `(tx hash, direction)`, then sort by timestamp
/// descending. A self-payment legitimately appears once per direction.
pub(crate) fn merge_records(
    sent: Vec<PaymentRecord>,
    received: Vec<PaymentRecord>,
) -> Vec<PaymentRecord> {
    let mut seen = HashSet::new();
    let mut merged: Vec<PaymentRecord> = sent
        .into_iter()
        .chain(received)
        .filter(|record| seen.insert((record.tx_hash, record.direction)))
        .collect();
    merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    merged
}
