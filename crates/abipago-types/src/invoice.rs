//! Invoice validation, the deterministic invoice id, and nonce minting.
//!
//! The invoice id is `keccak256(abi.encode(invoice))` over the 6-field tuple
//! declared in [`crate::abi`]. The computation is pure and identical on-chain
//! and off-chain, so the settlement key can be pre-computed before a
//! transaction is ever signed.

use alloy_primitives::{Address, B256, U256, keccak256};
use alloy_sol_types::SolValue;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::abi::Invoice;
use crate::timestamp::UnixTimestamp;

/// The unique settlement key of an [`Invoice`].
///
/// Two invoices map to the same id iff they agree on every field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceId(pub B256);

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<InvoiceId> for B256 {
    fn from(id: InvoiceId) -> Self {
        id.0
    }
}

/// Why an invoice is unacceptable for settlement.
///
/// These mirror the validation the settlement router performs on-chain, so
/// the orchestrator can reject a doomed payment before asking the wallet to
/// sign anything.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvoiceError {
    #[error("invoice receiver is the zero address")]
    ZeroReceiver,
    #[error("invoice tokenOut is the zero address")]
    ZeroToken,
    #[error("invoice amountOut is zero")]
    ZeroAmount,
    #[error("invoice expired: deadline {deadline} < now {now}")]
    Expired { deadline: u64, now: u64 },
}

impl Invoice {
    /// Builds an invoice with a freshly minted random nonce.
    pub fn new(
        receiver: Address,
        token_out: Address,
        amount_out: U256,
        deadline: UnixTimestamp,
        reference: B256,
    ) -> Self {
        Invoice {
            receiver,
            tokenOut: token_out,
            amountOut: amount_out,
            deadline: U256::from(deadline.seconds_since_epoch()),
            reference,
            nonce: fresh_nonce(),
        }
    }

    /// Deterministic invoice id: keccak-256 of the ABI encoding of the
    /// 6-field tuple.
    pub fn id(&self) -> InvoiceId {
        InvoiceId(keccak256(self.abi_encode()))
    }

    /// Checks the invariants the settlement router enforces on-chain:
    /// non-zero receiver, non-zero token, non-zero amount, and a deadline
    /// that has not passed. A zero deadline never expires.
    pub fn validate(&self, now: UnixTimestamp) -> Result<(), InvoiceError> {
        if self.receiver == Address::ZERO {
            return Err(InvoiceError::ZeroReceiver);
        }
        if self.tokenOut == Address::ZERO {
            return Err(InvoiceError::ZeroToken);
        }
        if self.amountOut.is_zero() {
            return Err(InvoiceError::ZeroAmount);
        }
        if !self.deadline.is_zero() {
            let deadline: u64 = self.deadline.saturating_to();
            if now.seconds_since_epoch() > deadline {
                return Err(InvoiceError::Expired {
                    deadline,
                    now: now.seconds_since_epoch(),
                });
            }
        }
        Ok(())
    }
}

/// Mints a random 256-bit replay differentiator.
pub fn fresh_nonce() -> U256 {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    U256::from_be_bytes(bytes)
}

/// Hashes a human-readable reference string into the 32-byte invoice
/// `reference` field. An empty string maps to the zero reference.
pub fn reference_of(tag: &str) -> B256 {
    if tag.is_empty() {
        B256::ZERO
    } else {
        keccak256(tag.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn invoice() -> Invoice {
        Invoice {
            receiver: address!("0x1111111111111111111111111111111111111111"),
            tokenOut: address!("0x2222222222222222222222222222222222222222"),
            amountOut: U256::from(3_500_000u64),
            deadline: U256::ZERO,
            reference: reference_of("order-42"),
            nonce: U256::from(7u64),
        }
    }

    #[test]
    fn id_is_deterministic() {
        assert_eq!(invoice().id(), invoice().id());
    }

    #[test]
    fn id_changes_with_every_field() {
        let base = invoice().id();
        let mut changed = invoice();
        changed.receiver = address!("0x3333333333333333333333333333333333333333");
        assert_ne!(base, changed.id());

        let mut changed = invoice();
        changed.tokenOut = address!("0x3333333333333333333333333333333333333333");
        assert_ne!(base, changed.id());

        let mut changed = invoice();
        changed.amountOut = U256::from(3_500_001u64);
        assert_ne!(base, changed.id());

        let mut changed = invoice();
        changed.deadline = U256::from(1u64);
        assert_ne!(base, changed.id());

        let mut changed = invoice();
        changed.reference = reference_of("order-43");
        assert_ne!(base, changed.id());

        let mut changed = invoice();
        changed.nonce = U256::from(8u64);
        assert_ne!(base, changed.id());
    }

    #[test]
    fn id_hashes_the_abi_tuple() {
        // 6 static fields ABI-encode to 192 bytes; the id is their keccak.
        let inv = invoice();
        assert_eq!(inv.abi_encode().len(), 192);
        assert_eq!(inv.id().0, keccak256(inv.abi_encode()));
    }

    #[test]
    fn validate_rejects_zero_fields() {
        let now = UnixTimestamp(1_700_000_000);

        let mut inv = invoice();
        inv.receiver = Address::ZERO;
        assert_eq!(inv.validate(now), Err(InvoiceError::ZeroReceiver));

        let mut inv = invoice();
        inv.tokenOut = Address::ZERO;
        assert_eq!(inv.validate(now), Err(InvoiceError::ZeroToken));

        let mut inv = invoice();
        inv.amountOut = U256::ZERO;
        assert_eq!(inv.validate(now), Err(InvoiceError::ZeroAmount));
    }

    #[test]
    fn zero_deadline_never_expires() {
        let inv = invoice();
        assert_eq!(inv.validate(UnixTimestamp(u64::MAX)), Ok(()));
    }

    #[test]
    fn past_deadline_expires() {
        let mut inv = invoice();
        inv.deadline = U256::from(999u64);
        assert_eq!(
            inv.validate(UnixTimestamp(1_000)),
            Err(InvoiceError::Expired {
                deadline: 999,
                now: 1_000
            })
        );
        // Exactly at the deadline is still valid.
        assert_eq!(inv.validate(UnixTimestamp(999)), Ok(()));
    }

    #[test]
    fn fresh_nonces_differ() {
        assert_ne!(fresh_nonce(), fresh_nonce());
    }

    #[test]
    fn empty_reference_is_zero() {
        assert_eq!(reference_of(""), B256::ZERO);
        assert_ne!(reference_of("x"), B256::ZERO);
    }
}
