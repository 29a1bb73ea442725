//! Payment intent resolution and execution-mode classification.
//!
//! A scanned URI plus the merchant's resolved profile become a
//! [`PaymentIntent`]: the finished invoice and its destination parameters,
//! with QR fields taking precedence over profile fields on conflict. The
//! intent plus the payer's chosen input token classify into one of three
//! execution modes: same-chain direct, native wrap-and-pay, or cross-chain
//! bridge-and-settle.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;

use abipago_types::abi::{ISettlementRouter, Invoice};
use abipago_types::amount::{MoneyAmount, MoneyAmountParseError};
use abipago_types::chain::ChainRef;
use abipago_types::invoice::reference_of;
use abipago_types::networks::{self, NATIVE_SENTINEL};
use abipago_types::timestamp::UnixTimestamp;
use abipago_types::uri::PaymentRequestUri;

use crate::profile::{DEFAULT_SLIPPAGE_BPS, PaymentProfile};
use crate::routing::ContractCall;

/// Gas limit the routing oracle reserves for the terminal settlement call.
const SETTLE_GAS_LIMIT: &str = "500000";

/// Why a scanned payload plus profile cannot become a payable intent.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("no receiver: absent from both the payload and the profile")]
    MissingReceiver,
    #[error("no settlement chain: absent from both the payload and the profile")]
    MissingChain,
    #[error("no settlement token: absent from both the payload and the profile")]
    MissingToken,
    #[error("unknown decimals for token {0}; the payload must carry them")]
    UnknownDecimals(Address),
    #[error("unpayable amount: {0}")]
    BadAmount(#[from] MoneyAmountParseError),
}

/// The finished payment commitment: invoice plus destination parameters.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub invoice: Invoice,
    pub dest_chain: ChainRef,
    /// Settlement router on the destination chain.
    pub router: Address,
    /// Display amount in the merchant's token, e.g. `"3.50"`.
    pub display_amount: String,
    pub memo: Option<String>,
    pub slippage_bps: u16,
}

impl PaymentIntent {
    /// Merges QR fields with the resolved profile into a payable intent.
    ///
    /// Precedence per field: QR over profile over defaults. Token decimals
    /// come from the QR, then the token registry. The invoice deadline is
    /// derived from the profile's `expirySec` hint; without one the invoice
    /// never expires.
    pub fn resolve(
        uri: &PaymentRequestUri,
        profile: Option<&PaymentProfile>,
        default_router: Address,
        now: UnixTimestamp,
    ) -> Result<Self, IntentError> {
        let receiver = uri
            .receiver
            .or(profile.map(|p| p.receiver))
            .ok_or(IntentError::MissingReceiver)?;
        let dest_chain = uri
            .chain_id
            .or(profile.map(|p| p.chain))
            .ok_or(IntentError::MissingChain)?;
        let token = uri
            .token
            .or(profile.map(|p| p.token))
            .ok_or(IntentError::MissingToken)?;

        let decimals = uri
            .decimals
            .or_else(|| networks::known_token(dest_chain, token).map(|t| t.decimals))
            .ok_or(IntentError::UnknownDecimals(token))?;
        let amount_out = MoneyAmount::parse(&uri.amount)?.to_token_units(decimals)?;

        let deadline = profile
            .and_then(|p| p.expiry_sec)
            .map(|expiry| now + expiry)
            .unwrap_or(UnixTimestamp(0));
        let reference = reference_of(uri.reference.as_deref().unwrap_or_default());
        let router = uri
            .router
            .or(profile.and_then(|p| p.router))
            .unwrap_or(default_router);

        Ok(Self {
            invoice: Invoice::new(receiver, token, amount_out, deadline, reference),
            dest_chain,
            router,
            display_amount: uri.amount.clone(),
            memo: profile.and_then(|p| p.memo.clone()),
            slippage_bps: profile.map(|p| p.slippage_bps).unwrap_or(DEFAULT_SLIPPAGE_BPS),
        })
    }
}

/// The three execution modes a payment classifies into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanMode {
    /// Same chain, ERC-20 input: approve then `settle`.
    Direct { needs_approval: bool },
    /// Same chain, native input: `settleNative` with attached value.
    Native,
    /// Different chains: bridge terminating in `settleFromBridge`, whose
    /// calldata the routing oracle injects into its contract-call quote.
    CrossChain { settle_call: Bytes },
}

/// A classified payment ready for the execution driver.
#[derive(Debug, Clone)]
pub struct PaymentPlan {
    pub invoice: Invoice,
    pub payer: Address,
    pub payer_chain: ChainRef,
    pub dest_chain: ChainRef,
    pub router: Address,
    /// Token the payer spends; the native sentinel for native mode.
    pub token_in: Address,
    /// Raw input amount in `token_in` units.
    pub amount_in: U256,
    /// Human-readable amount for display.
    pub display_amount: String,
    pub mode: PlanMode,
}

/// Classifies a payment. First match wins:
///
/// 1. Different chains → cross-chain, carrying the encoded
///    `settleFromBridge(invoice, tokenOut, amountOut, "", refundTo = payer)`.
/// 2. Same chain, native sentinel input → native.
/// 3. Same chain, ERC-20 input → direct, approval required.
pub fn classify(
    intent: &PaymentIntent,
    payer: Address,
    payer_chain: ChainRef,
    token_in: Address,
    amount_in: U256,
) -> PaymentPlan {
    let mode = if payer_chain != intent.dest_chain {
        let settle_call = ISettlementRouter::settleFromBridgeCall {
            invoice: intent.invoice.clone(),
            tokenIn: intent.invoice.tokenOut,
            amountIn: intent.invoice.amountOut,
            swapData: Bytes::new(),
            refundTo: payer,
        }
        .abi_encode();
        PlanMode::CrossChain {
            settle_call: settle_call.into(),
        }
    } else if token_in == NATIVE_SENTINEL {
        PlanMode::Native
    } else {
        PlanMode::Direct {
            needs_approval: true,
        }
    };

    PaymentPlan {
        invoice: intent.invoice.clone(),
        payer,
        payer_chain,
        dest_chain: intent.dest_chain,
        router: intent.router,
        token_in,
        amount_in,
        display_amount: intent.display_amount.clone(),
        mode,
    }
}

impl PaymentPlan {
    /// The post-bridge contract call for the routing oracle, present only
    /// on cross-chain plans.
    pub fn contract_call(&self) -> Option<ContractCall> {
        match &self.mode {
            PlanMode::CrossChain { settle_call } => Some(ContractCall {
                from_amount: self.invoice.amountOut.to_string(),
                from_token_address: self.invoice.tokenOut,
                to_contract_address: self.router,
                to_contract_call_data: format!("0x{}", hex::encode(settle_call)),
                to_contract_gas_limit: SETTLE_GAS_LIMIT.into(),
            }),
            _ => None,
        }
    }
}
