//! The AbiPago settlement engine.
//!
//! A transaction-faithful model of the settlement router deployed on every
//! destination chain. The router receives funds (pulled from the caller,
//! delivered by a bridge executor, or attached as native value), optionally
//! swaps them to the merchant's requested token, deducts a bounded protocol
//! fee, pays the merchant the exact invoiced amount, refunds dust to an
//! explicit refund recipient, and permanently marks the invoice as settled.
//!
//! All token movement goes through the [`bank::Bank`] trait, which abstracts
//! the token environment the router executes in. [`bank::InMemoryBank`]
//! implements it for tests; the on-chain deployment binds the same semantics
//! to real ERC-20 calls. Engine storage sits behind interior mutability so a
//! malicious token callback can attempt re-entry and be refused by the
//! reentrancy guard, exactly as on-chain storage remains reachable during an
//! external call.
//!
//! Every settlement entrypoint is atomic: on any error the bank and the
//! router storage are rolled back to their pre-call state, mirroring EVM
//! transaction revert semantics.

pub mod bank;
pub mod engine;
pub mod error;
pub mod events;

pub use bank::{Bank, BankError, InMemoryBank, SwapCall};
pub use engine::{CallContext, FeeConfig, SettlementRouter, MAX_FEE_BPS, SWAP_ALLOWANCE_TTL_SECS};
pub use error::SettleError;
pub use events::RouterEvent;
