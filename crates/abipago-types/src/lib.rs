//! Core types for the AbiPago payment protocol.
//!
//! AbiPago routes a payer's funds from whatever token/chain they hold to the
//! exact token/chain/amount a merchant demands, settling atomically through an
//! on-chain router. This crate holds the data model shared by the settlement
//! engine and the client-side orchestrator:
//!
//! - [`abi`] — the settlement router ABI: the canonical invoice tuple, every
//!   router entrypoint, and the emitted events, declared once via `sol!`.
//! - [`invoice`] — invoice validation, the deterministic invoice id, and
//!   nonce minting.
//! - [`chain`] — the numeric chain reference used to address EVM networks.
//! - [`networks`] — known chains, token deployments, wrapped-native and
//!   router addresses, and the native-asset sentinel.
//! - [`amount`] — human-readable decimal amounts scaled to raw token units.
//! - [`timestamp`] — unix-seconds timestamps for invoice deadlines.
//! - [`uri`] — the `abipago://pay` invoice payload carried by QR/NFC.

pub mod abi;
pub mod amount;
pub mod chain;
pub mod invoice;
pub mod networks;
pub mod timestamp;
pub mod uri;

pub use abi::Invoice;
pub use amount::{MoneyAmount, MoneyAmountParseError};
pub use chain::ChainRef;
pub use invoice::{InvoiceError, InvoiceId};
pub use timestamp::UnixTimestamp;
pub use uri::PaymentRequestUri;
