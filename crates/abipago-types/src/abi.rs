//! The settlement router ABI.
//!
//! This is the single source of truth for everything that crosses the
//! contract boundary: the canonical 6-field invoice tuple, the router
//! entrypoints, and the events the router emits. The orchestrator uses the
//! generated call types to encode calldata (notably the post-bridge
//! `settleFromBridge` call injected into routing-oracle quotes) and the
//! generated event types to decode settlement receipts from logs.
//!
//! Field order of [`Invoice`] is load-bearing: the invoice id is the
//! keccak-256 hash of the ABI encoding of the tuple in exactly this order.

use alloy_sol_types::sol;
use serde::{Deserialize, Serialize};

sol!(
    #![sol(all_derives = true)]

    /// The canonical on-chain payment commitment.
    ///
    /// Created off-chain by the merchant (or assembled by the payer app from
    /// scanned fields), never mutated, and consumed exactly once by the
    /// settlement router. `deadline == 0` means the invoice never expires.
    /// `reference` is an application-level tag, typically the hash of a
    /// human-readable identifier; `nonce` differentiates otherwise identical
    /// invoices.
    #[derive(Serialize, Deserialize)]
    struct Invoice {
        address receiver;
        address tokenOut;
        uint256 amountOut;
        uint256 deadline;
        bytes32 reference;
        uint256 nonce;
    }

    /// The settlement router deployed on every supported chain.
    ///
    /// All settlement entrypoints take an explicit `refundTo`: in bridge
    /// flows `msg.sender` is the bridge executor, not the payer, so dust and
    /// post-swap surplus must never be routed to the caller.
    interface ISettlementRouter {
        /// Pull `amountIn` of `tokenIn` from the caller (requires prior
        /// approval), optionally swap, and settle the invoice.
        function settle(
            Invoice calldata invoice,
            address tokenIn,
            uint256 amountIn,
            bytes calldata swapData,
            address refundTo
        ) external;

        /// Settle from tokens already delivered to the router by a bridge
        /// executor. No pull; the router checks its own balance.
        function settleFromBridge(
            Invoice calldata invoice,
            address tokenIn,
            uint256 amountIn,
            bytes calldata swapData,
            address refundTo
        ) external;

        /// Settle with attached native value; the router wraps the full
        /// value on entry and proceeds with the wrapped-native token.
        function settleNative(
            Invoice calldata invoice,
            bytes calldata swapData,
            address refundTo
        ) external payable;

        /// Settle several invoices sharing one `tokenOut` with a single pull
        /// and at most one swap.
        function settleBatch(
            Invoice[] calldata invoices,
            address tokenIn,
            uint256 amountIn,
            bytes calldata swapData,
            address refundTo
        ) external;

        /// Deterministic invoice id; callable off-chain to pre-compute the
        /// settlement key.
        function computeInvoiceId(Invoice calldata invoice) external pure returns (bytes32);

        function isSettled(Invoice calldata invoice) external view returns (bool);

        function setFeeConfig(address recipient, uint16 bps) external;
        function setDexRouter(address dexRouter) external;
        function transferOwnership(address newOwner) external;

        /// Emergency withdrawal for tokens stranded by external callers.
        function rescue(address token, address to, uint256 amount) external;
        function rescueNative(address to, uint256 amount) external;

        /// Emitted exactly once per successfully settled invoice.
        event PaymentExecuted(
            bytes32 indexed reference,
            address indexed receiver,
            address indexed payer,
            address tokenIn,
            uint256 amountIn,
            address tokenOut,
            uint256 amountOut,
            uint256 fee,
            uint256 timestamp
        );

        /// Emitted in addition to `PaymentExecuted` for bridge-originated
        /// settlements, distinguishing bridge flows from direct flows.
        event BridgeSettlement(
            bytes32 indexed reference,
            address indexed receiver,
            address tokenIn,
            uint256 amountIn,
            address tokenOut,
            uint256 amountOut,
            uint256 timestamp
        );

        event BatchSettled(uint256 count, uint256 timestamp);
        event FeeConfigUpdated(address recipient, uint16 bps);
        event OwnershipTransferred(address indexed previousOwner, address indexed newOwner);
    }
);
