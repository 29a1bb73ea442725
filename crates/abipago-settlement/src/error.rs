//! The settlement failure taxonomy.
//!
//! Every way a settlement can fail is a structured code, never an opaque
//! string: the orchestrator maps these onto step-level error annotations and
//! tests assert on exact variants.

use alloy_primitives::{Address, U256};

use abipago_types::invoice::{InvoiceError, InvoiceId};

use crate::bank::BankError;

/// All possible settlement-engine failures. Each aborts (and rolls back) the
/// enclosing settlement transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettleError {
    /// `deadline != 0` and the block time is past it.
    #[error("invoice expired: deadline {deadline}, now {now}")]
    InvoiceExpired { deadline: u64, now: u64 },
    /// The ledger bit for this invoice id is already set.
    #[error("invoice {0} already settled")]
    AlreadySettled(InvoiceId),
    /// `amountIn < amountOut` (direct) or the bridge delivered less than
    /// `amountIn` (bridge).
    #[error("insufficient input: required {required}, available {available}")]
    InsufficientInput { required: U256, available: U256 },
    /// The post-swap output balance does not cover `amountOut`.
    #[error("swap output insufficient: required {required}, produced {produced}")]
    SwapOutputInsufficient { required: U256, produced: U256 },
    /// A token transfer failed in the underlying token environment.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] BankError),
    /// A required address field is zero.
    #[error("zero address")]
    ZeroAddress,
    /// A required amount field is zero.
    #[error("zero amount")]
    ZeroAmount,
    /// Admin supplied a fee above the hard 1% ceiling.
    #[error("fee too high: {0} bps")]
    FeeTooHigh(u16),
    /// The reentrancy guard tripped.
    #[error("reentrant call")]
    Reentrancy,
    /// Batch settlement invoked with no invoices.
    #[error("empty invoice batch")]
    BatchEmpty,
    /// Batch invoices disagree on `tokenOut`.
    #[error("batch tokenOut mismatch: expected {expected}, found {found}")]
    TokenOutMismatch { expected: Address, found: Address },
    /// Caller is not the owner on an admin-gated operation.
    #[error("caller {caller} is not the owner")]
    Unauthorized { caller: Address },
    /// The swap-data blob is not a valid `(commands, inputs[], deadline)`
    /// encoding.
    #[error("invalid swap data: {0}")]
    InvalidSwapData(String),
}

impl From<InvoiceError> for SettleError {
    fn from(err: InvoiceError) -> Self {
        match err {
            InvoiceError::ZeroReceiver | InvoiceError::ZeroToken => SettleError::ZeroAddress,
            InvoiceError::ZeroAmount => SettleError::ZeroAmount,
            InvoiceError::Expired { deadline, now } => {
                SettleError::InvoiceExpired { deadline, now }
            }
        }
    }
}
