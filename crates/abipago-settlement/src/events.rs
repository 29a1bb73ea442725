//! Events emitted by the settlement engine.
//!
//! These are the `sol!`-generated event types from the router ABI, recorded
//! in emission order. The on-chain deployment emits the same events with the
//! same field semantics, which is what makes off-chain history
//! reconstruction possible.

use abipago_types::abi::ISettlementRouter::{
    BatchSettled, BridgeSettlement, FeeConfigUpdated, OwnershipTransferred, PaymentExecuted,
};

/// An entry in the router's event log.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// One per successfully settled invoice, every mode.
    PaymentExecuted(PaymentExecuted),
    /// Emitted in addition to [`RouterEvent::PaymentExecuted`] for
    /// bridge-originated settlements.
    BridgeSettlement(BridgeSettlement),
    BatchSettled(BatchSettled),
    FeeConfigUpdated(FeeConfigUpdated),
    OwnershipTransferred(OwnershipTransferred),
}

impl RouterEvent {
    /// The payment receipt, if this entry is one.
    pub fn as_payment(&self) -> Option<&PaymentExecuted> {
        match self {
            RouterEvent::PaymentExecuted(event) => Some(event),
            _ => None,
        }
    }

    /// The bridge-settlement marker, if this entry is one.
    pub fn as_bridge_settlement(&self) -> Option<&BridgeSettlement> {
        match self {
            RouterEvent::BridgeSettlement(event) => Some(event),
            _ => None,
        }
    }
}
