//! The settlement router: replay-safe, reentrancy-safe settlement with an
//! optional swap to the merchant's requested token.
//!
//! Storage lives behind `Cell`/`RefCell` so that the engine is reachable
//! from within an external call, the way contract storage is on-chain; the
//! reentrancy guard is what turns that reachability into a hard error.
//! Every settlement entrypoint runs inside [`SettlementRouter::transactional`],
//! which checkpoints both the bank and the router storage and rolls them
//! back on any failure.
//!
//! The single most important invariant here: dust, excess input, and
//! post-swap surplus always flow to the explicit `refund_to` argument and
//! never to the caller. In bridge flows the caller is the bridge executor
//! contract, not the payer.

use alloy_primitives::{Address, B256, U256};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use abipago_types::abi::ISettlementRouter::{
    BatchSettled, BridgeSettlement, FeeConfigUpdated, OwnershipTransferred, PaymentExecuted,
};
use abipago_types::abi::Invoice;
use abipago_types::invoice::InvoiceId;
use abipago_types::timestamp::UnixTimestamp;

use crate::bank::{Bank, SwapCall};
use crate::error::SettleError;
use crate::events::RouterEvent;

/// Hard ceiling on the protocol fee: 100 bps = 1%.
pub const MAX_FEE_BPS: u16 = 100;

/// Lifetime of the bounded DEX allowance issued through the allowance
/// manager per swap.
pub const SWAP_ALLOWANCE_TTL_SECS: u64 = 30 * 60;

const BPS_DENOMINATOR: u64 = 10_000;

/// Process-wide fee configuration. A zero recipient or zero bps disables
/// fee deduction entirely.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FeeConfig {
    pub recipient: Address,
    pub bps: u16,
}

impl FeeConfig {
    pub const DISABLED: FeeConfig = FeeConfig {
        recipient: Address::ZERO,
        bps: 0,
    };

    /// Fee owed on `amount`, zero when fees are disabled.
    pub fn fee_on(&self, amount: U256) -> U256 {
        if self.recipient == Address::ZERO || self.bps == 0 {
            return U256::ZERO;
        }
        amount * U256::from(self.bps) / U256::from(BPS_DENOMINATOR)
    }
}

/// `msg.sender` and `msg.value` of an inbound call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    pub value: U256,
}

impl CallContext {
    /// A plain call with no attached value.
    pub fn new(caller: Address) -> Self {
        Self {
            caller,
            value: U256::ZERO,
        }
    }

    pub fn with_value(caller: Address, value: U256) -> Self {
        Self { caller, value }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Guard {
    Idle,
    Entered,
}

/// What a completed single settlement moved, used for event emission.
struct SettleOutcome {
    fee: U256,
}

struct Snapshot {
    owner: Address,
    dex_router: Address,
    fee: FeeConfig,
    settled: HashSet<B256>,
    manager_ready: HashSet<Address>,
    events_len: usize,
}

/// The settlement router deployed on the destination chain.
///
/// Constructed with its own address (for balance queries), the deployer
/// (initial owner), the chain's wrapped-native token, the DEX router, and
/// the delegated allowance manager.
pub struct SettlementRouter {
    address: Address,
    wrapped_native: Address,
    allowance_manager: Address,
    owner: Cell<Address>,
    dex_router: Cell<Address>,
    fee: Cell<FeeConfig>,
    guard: Cell<Guard>,
    settled: RefCell<HashSet<B256>>,
    manager_ready: RefCell<HashSet<Address>>,
    events: RefCell<Vec<RouterEvent>>,
}

impl SettlementRouter {
    /// Deploys the router. Ownership is initialized to the deployer and an
    /// ownership-transferred event from the zero address is emitted.
    pub fn new(
        address: Address,
        deployer: Address,
        wrapped_native: Address,
        dex_router: Address,
        allowance_manager: Address,
    ) -> Self {
        let router = Self {
            address,
            wrapped_native,
            allowance_manager,
            owner: Cell::new(deployer),
            dex_router: Cell::new(dex_router),
            fee: Cell::new(FeeConfig::DISABLED),
            guard: Cell::new(Guard::Idle),
            settled: RefCell::new(HashSet::new()),
            manager_ready: RefCell::new(HashSet::new()),
            events: RefCell::new(Vec::new()),
        };
        router.emit(RouterEvent::OwnershipTransferred(OwnershipTransferred {
            previousOwner: Address::ZERO,
            newOwner: deployer,
        }));
        router
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner.get()
    }

    pub fn fee_config(&self) -> FeeConfig {
        self.fee.get()
    }

    pub fn dex_router(&self) -> Address {
        self.dex_router.get()
    }

    /// Deterministic invoice id, identical on-chain and off-chain.
    pub fn compute_invoice_id(invoice: &Invoice) -> InvoiceId {
        invoice.id()
    }

    pub fn is_settled(&self, invoice: &Invoice) -> bool {
        self.settled.borrow().contains(&invoice.id().0)
    }

    /// Events emitted so far, in emission order.
    pub fn events(&self) -> Vec<RouterEvent> {
        self.events.borrow().clone()
    }

    // ------------------------------------------------------------------
    // Settlement entrypoints
    // ------------------------------------------------------------------

    /// Pulls `amount_in` of `token_in` from the caller (who must have
    /// approved the router), then settles the invoice.
    pub fn settle<B: Bank>(
        &self,
        bank: &mut B,
        ctx: CallContext,
        invoice: &Invoice,
        token_in: Address,
        amount_in: U256,
        swap_data: &[u8],
        refund_to: Address,
    ) -> Result<InvoiceId, SettleError> {
        self.transactional(bank, |router, bank| {
            let id = router.begin_settlement(bank, invoice)?;
            bank.transfer_from(token_in, router.address, ctx.caller, router.address, amount_in)?;
            let outcome =
                router.settle_single(bank, invoice, token_in, amount_in, swap_data, refund_to)?;
            router.emit_payment(bank, invoice, ctx.caller, token_in, amount_in, &outcome);
            tracing::debug!(invoice = %id, payer = %ctx.caller, "settled invoice");
            Ok(id)
        })
    }

    /// Settles from tokens already delivered to the router by a bridge
    /// executor. The recorded payer is `refund_to`, the real payer; the
    /// caller is the executor and receives nothing.
    pub fn settle_from_bridge<B: Bank>(
        &self,
        bank: &mut B,
        ctx: CallContext,
        invoice: &Invoice,
        token_in: Address,
        amount_in: U256,
        swap_data: &[u8],
        refund_to: Address,
    ) -> Result<InvoiceId, SettleError> {
        self.transactional(bank, |router, bank| {
            let id = router.begin_settlement(bank, invoice)?;
            let delivered = bank.balance_of(token_in, router.address);
            if delivered < amount_in {
                return Err(SettleError::InsufficientInput {
                    required: amount_in,
                    available: delivered,
                });
            }
            let outcome =
                router.settle_single(bank, invoice, token_in, amount_in, swap_data, refund_to)?;
            router.emit_payment(bank, invoice, refund_to, token_in, amount_in, &outcome);
            router.emit(RouterEvent::BridgeSettlement(BridgeSettlement {
                reference: invoice.reference,
                receiver: invoice.receiver,
                tokenIn: token_in,
                amountIn: amount_in,
                tokenOut: invoice.tokenOut,
                amountOut: invoice.amountOut,
                timestamp: U256::from(bank.timestamp()),
            }));
            tracing::debug!(invoice = %id, executor = %ctx.caller, "settled bridge invoice");
            Ok(id)
        })
    }

    /// Settles with attached native value: the full value is wrapped into
    /// the wrapped-native token on entry.
    pub fn settle_native<B: Bank>(
        &self,
        bank: &mut B,
        ctx: CallContext,
        invoice: &Invoice,
        swap_data: &[u8],
        refund_to: Address,
    ) -> Result<InvoiceId, SettleError> {
        self.transactional(bank, |router, bank| {
            let id = router.begin_settlement(bank, invoice)?;
            let amount_in = ctx.value;
            bank.transfer_native(ctx.caller, router.address, amount_in)?;
            bank.wrap_native(router.wrapped_native, router.address, amount_in)?;
            let outcome = router.settle_single(
                bank,
                invoice,
                router.wrapped_native,
                amount_in,
                swap_data,
                refund_to,
            )?;
            router.emit_payment(
                bank,
                invoice,
                ctx.caller,
                router.wrapped_native,
                amount_in,
                &outcome,
            );
            tracing::debug!(invoice = %id, payer = %ctx.caller, "settled native invoice");
            Ok(id)
        })
    }

    /// Settles several invoices sharing one `tokenOut` with a single pull
    /// and at most one swap. TokenOut coherence is verified before any state
    /// change; dust of both tokens goes to `refund_to` after the loop.
    pub fn settle_batch<B: Bank>(
        &self,
        bank: &mut B,
        ctx: CallContext,
        invoices: &[Invoice],
        token_in: Address,
        amount_in: U256,
        swap_data: &[u8],
        refund_to: Address,
    ) -> Result<Vec<InvoiceId>, SettleError> {
        self.transactional(bank, |router, bank| {
            let first = invoices.first().ok_or(SettleError::BatchEmpty)?;
            let token_out = first.tokenOut;
            for invoice in invoices {
                if invoice.tokenOut != token_out {
                    return Err(SettleError::TokenOutMismatch {
                        expected: token_out,
                        found: invoice.tokenOut,
                    });
                }
            }

            bank.transfer_from(token_in, router.address, ctx.caller, router.address, amount_in)?;

            if token_in != token_out {
                router.prepare_swap_allowances(bank, token_in, amount_in);
                if !swap_data.is_empty() {
                    let call = SwapCall::decode(swap_data)?;
                    bank.execute_swap(router.dex_router.get(), router.address, &call)?;
                }
            }

            let fee_config = router.fee.get();
            let mut ids = Vec::with_capacity(invoices.len());
            for invoice in invoices {
                ids.push(router.begin_settlement(bank, invoice)?);
                let available = bank.balance_of(token_out, router.address);
                if available < invoice.amountOut {
                    return Err(SettleError::SwapOutputInsufficient {
                        required: invoice.amountOut,
                        produced: available,
                    });
                }
                let fee = fee_config.fee_on(invoice.amountOut);
                if !fee.is_zero() {
                    bank.transfer(token_out, router.address, fee_config.recipient, fee)?;
                }
                bank.transfer(
                    token_out,
                    router.address,
                    invoice.receiver,
                    invoice.amountOut - fee,
                )?;
                router.emit_payment(
                    bank,
                    invoice,
                    ctx.caller,
                    token_in,
                    invoice.amountOut,
                    &SettleOutcome { fee },
                );
            }

            router.refund_remaining(bank, token_out, refund_to)?;
            if token_in != token_out {
                router.refund_remaining(bank, token_in, refund_to)?;
            }

            router.emit(RouterEvent::BatchSettled(BatchSettled {
                count: U256::from(invoices.len() as u64),
                timestamp: U256::from(bank.timestamp()),
            }));
            tracing::debug!(count = invoices.len(), "settled invoice batch");
            Ok(ids)
        })
    }

    // ------------------------------------------------------------------
    // Administrative entrypoints, gated on the owner
    // ------------------------------------------------------------------

    pub fn set_fee_config(
        &self,
        ctx: CallContext,
        recipient: Address,
        bps: u16,
    ) -> Result<(), SettleError> {
        self.only_owner(&ctx)?;
        if bps > MAX_FEE_BPS {
            return Err(SettleError::FeeTooHigh(bps));
        }
        self.fee.set(FeeConfig { recipient, bps });
        self.emit(RouterEvent::FeeConfigUpdated(FeeConfigUpdated {
            recipient,
            bps,
        }));
        Ok(())
    }

    pub fn set_dex_router(&self, ctx: CallContext, dex_router: Address) -> Result<(), SettleError> {
        self.only_owner(&ctx)?;
        if dex_router == Address::ZERO {
            return Err(SettleError::ZeroAddress);
        }
        self.dex_router.set(dex_router);
        Ok(())
    }

    pub fn transfer_ownership(
        &self,
        ctx: CallContext,
        new_owner: Address,
    ) -> Result<(), SettleError> {
        self.only_owner(&ctx)?;
        if new_owner == Address::ZERO {
            return Err(SettleError::ZeroAddress);
        }
        let previous = self.owner.replace(new_owner);
        self.emit(RouterEvent::OwnershipTransferred(OwnershipTransferred {
            previousOwner: previous,
            newOwner: new_owner,
        }));
        Ok(())
    }

    /// Emergency withdrawal for tokens stranded by external callers.
    pub fn rescue<B: Bank>(
        &self,
        bank: &mut B,
        ctx: CallContext,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), SettleError> {
        self.only_owner(&ctx)?;
        bank.transfer(token, self.address, to, amount)?;
        Ok(())
    }

    pub fn rescue_native<B: Bank>(
        &self,
        bank: &mut B,
        ctx: CallContext,
        to: Address,
        amount: U256,
    ) -> Result<(), SettleError> {
        self.only_owner(&ctx)?;
        bank.transfer_native(self.address, to, amount)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Runs `f` under the reentrancy guard with transaction semantics: on
    /// any error both the bank and the router storage are restored to their
    /// state at entry. The guard itself is never part of the rollback.
    fn transactional<B: Bank, T>(
        &self,
        bank: &mut B,
        f: impl FnOnce(&Self, &mut B) -> Result<T, SettleError>,
    ) -> Result<T, SettleError> {
        if self.guard.get() == Guard::Entered {
            return Err(SettleError::Reentrancy);
        }
        self.guard.set(Guard::Entered);
        let bank_checkpoint = bank.checkpoint();
        let state_checkpoint = self.snapshot();
        let outcome = f(self, bank);
        if outcome.is_err() {
            bank.revert(bank_checkpoint);
            self.restore(state_checkpoint);
        }
        self.guard.set(Guard::Idle);
        outcome
    }

    /// Validates the invoice and flips its ledger bit. The bit is set before
    /// any external token movement (checks-effects-interactions); the
    /// transactional wrapper unsets it again if the settlement later fails.
    fn begin_settlement<B: Bank>(
        &self,
        bank: &B,
        invoice: &Invoice,
    ) -> Result<InvoiceId, SettleError> {
        invoice.validate(UnixTimestamp(bank.timestamp()))?;
        let id = invoice.id();
        let freshly_marked = self.settled.borrow_mut().insert(id.0);
        if !freshly_marked {
            return Err(SettleError::AlreadySettled(id));
        }
        Ok(id)
    }

    /// The common post-validation pipeline shared by all single-invoice
    /// settlement modes. Input tokens are already in the router's balance.
    fn settle_single<B: Bank>(
        &self,
        bank: &mut B,
        invoice: &Invoice,
        token_in: Address,
        amount_in: U256,
        swap_data: &[u8],
        refund_to: Address,
    ) -> Result<SettleOutcome, SettleError> {
        let token_out = invoice.tokenOut;
        let amount_out = invoice.amountOut;
        let fee_config = self.fee.get();

        if token_in == token_out {
            if amount_in < amount_out {
                return Err(SettleError::InsufficientInput {
                    required: amount_out,
                    available: amount_in,
                });
            }
            let fee = fee_config.fee_on(amount_out);
            if !fee.is_zero() {
                bank.transfer(token_out, self.address, fee_config.recipient, fee)?;
            }
            bank.transfer(token_out, self.address, invoice.receiver, amount_out - fee)?;
            let dust = amount_in - amount_out;
            if !dust.is_zero() {
                bank.transfer(token_in, self.address, refund_to, dust)?;
            }
            return Ok(SettleOutcome { fee });
        }

        self.prepare_swap_allowances(bank, token_in, amount_in);
        if !swap_data.is_empty() {
            let call = SwapCall::decode(swap_data)?;
            bank.execute_swap(self.dex_router.get(), self.address, &call)?;
        }

        let produced = bank.balance_of(token_out, self.address);
        if produced < amount_out {
            return Err(SettleError::SwapOutputInsufficient {
                required: amount_out,
                produced,
            });
        }

        let fee = fee_config.fee_on(amount_out);
        if !fee.is_zero() {
            bank.transfer(token_out, self.address, fee_config.recipient, fee)?;
        }
        bank.transfer(token_out, self.address, invoice.receiver, amount_out - fee)?;

        self.refund_remaining(bank, token_out, refund_to)?;
        self.refund_remaining(bank, token_in, refund_to)?;

        Ok(SettleOutcome { fee })
    }

    /// Bootstraps the unlimited router-to-manager allowance once per token,
    /// then issues the bounded, expiring DEX allowance for this swap.
    fn prepare_swap_allowances<B: Bank>(&self, bank: &mut B, token_in: Address, amount_in: U256) {
        let needs_bootstrap = self.manager_ready.borrow_mut().insert(token_in);
        if needs_bootstrap {
            bank.approve(token_in, self.address, self.allowance_manager, U256::MAX);
        }
        bank.approve_with_expiry(
            self.allowance_manager,
            token_in,
            self.address,
            self.dex_router.get(),
            amount_in,
            bank.timestamp() + SWAP_ALLOWANCE_TTL_SECS,
        );
    }

    /// Sends the router's entire remaining balance of `token` to `refund_to`.
    fn refund_remaining<B: Bank>(
        &self,
        bank: &mut B,
        token: Address,
        refund_to: Address,
    ) -> Result<(), SettleError> {
        let remaining = bank.balance_of(token, self.address);
        if !remaining.is_zero() {
            bank.transfer(token, self.address, refund_to, remaining)?;
        }
        Ok(())
    }

    fn emit_payment<B: Bank>(
        &self,
        bank: &B,
        invoice: &Invoice,
        payer: Address,
        token_in: Address,
        amount_in: U256,
        outcome: &SettleOutcome,
    ) {
        self.emit(RouterEvent::PaymentExecuted(PaymentExecuted {
            reference: invoice.reference,
            receiver: invoice.receiver,
            payer,
            tokenIn: token_in,
            amountIn: amount_in,
            tokenOut: invoice.tokenOut,
            amountOut: invoice.amountOut,
            fee: outcome.fee,
            timestamp: U256::from(bank.timestamp()),
        }));
    }

    fn emit(&self, event: RouterEvent) {
        self.events.borrow_mut().push(event);
    }

    fn only_owner(&self, ctx: &CallContext) -> Result<(), SettleError> {
        if ctx.caller != self.owner.get() {
            return Err(SettleError::Unauthorized { caller: ctx.caller });
        }
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            owner: self.owner.get(),
            dex_router: self.dex_router.get(),
            fee: self.fee.get(),
            settled: self.settled.borrow().clone(),
            manager_ready: self.manager_ready.borrow().clone(),
            events_len: self.events.borrow().len(),
        }
    }

    fn restore(&self, snapshot: Snapshot) {
        self.owner.set(snapshot.owner);
        self.dex_router.set(snapshot.dex_router);
        self.fee.set(snapshot.fee);
        *self.settled.borrow_mut() = snapshot.settled;
        *self.manager_ready.borrow_mut() = snapshot.manager_ready;
        self.events.borrow_mut().truncate(snapshot.events_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{BankError, InMemoryBank, SwapProgram};
    use alloy_primitives::{Bytes, address};
    use std::rc::Rc;

    const NOW: u64 = 1_700_000_000;

    fn router_addr() -> Address {
        address!("0xab1fa90c84d75f35c176d64ab7be90ca05a94bd7")
    }
    fn deployer() -> Address {
        address!("0xd000000000000000000000000000000000000001")
    }
    fn weth() -> Address {
        address!("0x4200000000000000000000000000000000000006")
    }
    fn dex() -> Address {
        address!("0x3fc91a3afd70395cd496c647d5a6cc9d4b2b7fad")
    }
    fn permit2() -> Address {
        address!("0x000000000022d473030f116ddee9f6b43ac78ba3")
    }
    fn usdc() -> Address {
        address!("0x078d782b760474a361dda0af3839290b0ef57ad6")
    }
    fn dai() -> Address {
        address!("0x6b175474e89094c44da98b954eedeac495271d0f")
    }
    fn merchant() -> Address {
        address!("0x00000000000000000000000000000000000000aa")
    }
    fn payer() -> Address {
        address!("0x00000000000000000000000000000000000000bb")
    }
    fn fee_sink() -> Address {
        address!("0x00000000000000000000000000000000000000fe")
    }
    fn executor() -> Address {
        address!("0x00000000000000000000000000000000000000ee")
    }

    fn router() -> SettlementRouter {
        SettlementRouter::new(router_addr(), deployer(), weth(), dex(), permit2())
    }

    fn bank() -> InMemoryBank {
        InMemoryBank::new(NOW)
    }

    fn invoice(token_out: Address, amount_out: u64) -> Invoice {
        Invoice {
            receiver: merchant(),
            tokenOut: token_out,
            amountOut: U256::from(amount_out),
            deadline: U256::ZERO,
            reference: abipago_types::invoice::reference_of("order-1"),
            nonce: U256::from(1u64),
        }
    }

    /// Funds the payer and approves the router for a direct settlement.
    fn fund_and_approve(bank: &mut InMemoryBank, token: Address, amount: u64) {
        bank.mint(token, payer(), U256::from(amount));
        bank.set_allowance(token, payer(), router_addr(), U256::from(amount));
    }

    #[test]
    fn direct_same_token_no_fee() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 5_000_000);

        let inv = invoice(usdc(), 3_500_000);
        router
            .settle(
                &mut bank,
                CallContext::new(payer()),
                &inv,
                usdc(),
                U256::from(5_000_000u64),
                &[],
                payer(),
            )
            .unwrap();

        assert_eq!(bank.balance_of(usdc(), merchant()), U256::from(3_500_000u64));
        assert_eq!(bank.balance_of(usdc(), payer()), U256::from(1_500_000u64));
        assert_eq!(bank.balance_of(usdc(), router_addr()), U256::ZERO);
        assert!(router.is_settled(&inv));

        let events = router.events();
        let payment = events
            .iter()
            .find_map(RouterEvent::as_payment)
            .expect("payment event");
        assert_eq!(payment.payer, payer());
        assert_eq!(payment.receiver, merchant());
        assert_eq!(payment.amountIn, U256::from(5_000_000u64));
        assert_eq!(payment.amountOut, U256::from(3_500_000u64));
        assert_eq!(payment.fee, U256::ZERO);
        assert_eq!(payment.timestamp, U256::from(NOW));
    }

    #[test]
    fn direct_same_token_with_fee() {
        let router = router();
        router
            .set_fee_config(CallContext::new(deployer()), fee_sink(), 50)
            .unwrap();

        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 10_000_000);

        let inv = invoice(usdc(), 10_000_000);
        router
            .settle(
                &mut bank,
                CallContext::new(payer()),
                &inv,
                usdc(),
                U256::from(10_000_000u64),
                &[],
                payer(),
            )
            .unwrap();

        assert_eq!(bank.balance_of(usdc(), fee_sink()), U256::from(50_000u64));
        assert_eq!(bank.balance_of(usdc(), merchant()), U256::from(9_950_000u64));
        // amountIn == amountOut: no dust, refund untouched.
        assert_eq!(bank.balance_of(usdc(), payer()), U256::ZERO);
    }

    #[test]
    fn conservation_holds_across_amounts() {
        for (amount_in, amount_out, bps) in [
            (5_000_000u64, 3_500_000u64, 0u16),
            (10_000_000, 10_000_000, 50),
            (7_777_777, 1, 100),
            (1_000_000, 999_999, 13),
        ] {
            let router = router();
            if bps > 0 {
                router
                    .set_fee_config(CallContext::new(deployer()), fee_sink(), bps)
                    .unwrap();
            }
            let mut bank = bank();
            fund_and_approve(&mut bank, usdc(), amount_in);

            let inv = invoice(usdc(), amount_out);
            router
                .settle(
                    &mut bank,
                    CallContext::new(payer()),
                    &inv,
                    usdc(),
                    U256::from(amount_in),
                    &[],
                    payer(),
                )
                .unwrap();

            let refund = bank.balance_of(usdc(), payer());
            let fee = bank.balance_of(usdc(), fee_sink());
            let merchant_got = bank.balance_of(usdc(), merchant());
            // refund + fee + payout == input, and the merchant receives
            // exactly the invoiced amount minus the fee.
            assert_eq!(refund + fee + merchant_got, U256::from(amount_in));
            assert_eq!(merchant_got, U256::from(amount_out) - fee);
        }
    }

    #[test]
    fn replay_is_rejected_across_all_modes() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 10_000_000);

        let inv = invoice(usdc(), 1_000_000);
        router
            .settle(
                &mut bank,
                CallContext::new(payer()),
                &inv,
                usdc(),
                U256::from(1_000_000u64),
                &[],
                payer(),
            )
            .unwrap();

        let id = inv.id();
        let again = router.settle(
            &mut bank,
            CallContext::new(payer()),
            &inv,
            usdc(),
            U256::from(1_000_000u64),
            &[],
            payer(),
        );
        assert_eq!(again, Err(SettleError::AlreadySettled(id)));

        bank.mint(usdc(), router_addr(), U256::from(1_000_000u64));
        let via_bridge = router.settle_from_bridge(
            &mut bank,
            CallContext::new(executor()),
            &inv,
            usdc(),
            U256::from(1_000_000u64),
            &[],
            payer(),
        );
        assert_eq!(via_bridge, Err(SettleError::AlreadySettled(id)));

        let via_batch = router.settle_batch(
            &mut bank,
            CallContext::new(payer()),
            std::slice::from_ref(&inv),
            usdc(),
            U256::from(1_000_000u64),
            &[],
            payer(),
        );
        assert_eq!(via_batch, Err(SettleError::AlreadySettled(id)));
    }

    #[test]
    fn insufficient_input_rejected() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 1_000_000);

        let inv = invoice(usdc(), 2_000_000);
        let result = router.settle(
            &mut bank,
            CallContext::new(payer()),
            &inv,
            usdc(),
            U256::from(1_000_000u64),
            &[],
            payer(),
        );
        assert_eq!(
            result,
            Err(SettleError::InsufficientInput {
                required: U256::from(2_000_000u64),
                available: U256::from(1_000_000u64),
            })
        );
        // Rolled back: the pull never happened and the ledger is clean.
        assert_eq!(bank.balance_of(usdc(), payer()), U256::from(1_000_000u64));
        assert!(!router.is_settled(&inv));
    }

    #[test]
    fn expired_invoice_rejected_and_rolled_back() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 1_000_000);

        let mut inv = invoice(usdc(), 1_000_000);
        inv.deadline = U256::from(NOW - 1);
        let result = router.settle(
            &mut bank,
            CallContext::new(payer()),
            &inv,
            usdc(),
            U256::from(1_000_000u64),
            &[],
            payer(),
        );
        assert_eq!(
            result,
            Err(SettleError::InvoiceExpired {
                deadline: NOW - 1,
                now: NOW,
            })
        );
        assert!(!router.is_settled(&inv));
        assert!(router.events().iter().all(|e| e.as_payment().is_none()));
    }

    #[test]
    fn deadline_zero_never_expires() {
        let router = router();
        let mut bank = InMemoryBank::new(u64::MAX);
        fund_and_approve(&mut bank, usdc(), 1_000_000);

        let inv = invoice(usdc(), 1_000_000);
        router
            .settle(
                &mut bank,
                CallContext::new(payer()),
                &inv,
                usdc(),
                U256::from(1_000_000u64),
                &[],
                payer(),
            )
            .unwrap();
    }

    #[test]
    fn validation_totality() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 1_000_000);
        let ctx = CallContext::new(payer());
        let one = U256::from(1_000_000u64);

        let mut inv = invoice(usdc(), 1_000_000);
        inv.receiver = Address::ZERO;
        assert_eq!(
            router.settle(&mut bank, ctx, &inv, usdc(), one, &[], payer()),
            Err(SettleError::ZeroAddress)
        );

        let mut inv = invoice(usdc(), 1_000_000);
        inv.tokenOut = Address::ZERO;
        assert_eq!(
            router.settle(&mut bank, ctx, &inv, usdc(), one, &[], payer()),
            Err(SettleError::ZeroAddress)
        );

        let inv = invoice(usdc(), 0);
        assert_eq!(
            router.settle(&mut bank, ctx, &inv, usdc(), one, &[], payer()),
            Err(SettleError::ZeroAmount)
        );
    }

    #[test]
    fn refund_goes_to_refund_to_not_caller() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 5_000_000);
        let refund_wallet = address!("0x00000000000000000000000000000000000000cc");

        let inv = invoice(usdc(), 3_000_000);
        router
            .settle(
                &mut bank,
                CallContext::new(payer()),
                &inv,
                usdc(),
                U256::from(5_000_000u64),
                &[],
                refund_wallet,
            )
            .unwrap();

        assert_eq!(bank.balance_of(usdc(), refund_wallet), U256::from(2_000_000u64));
        assert_eq!(bank.balance_of(usdc(), payer()), U256::ZERO);
    }

    #[test]
    fn swap_path_settles_and_refunds_both_tokens() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, dai(), 4_000_000);
        // Swap consumes 3.9 DAI units and produces 3.6 USDC units:
        // 0.1 DAI and 0.1 USDC of dust must land at the refund wallet.
        bank.program_swap(SwapProgram {
            token_in: dai(),
            token_out: usdc(),
            consume: U256::from(3_900_000u64),
            produce: U256::from(3_600_000u64),
        });

        let swap_data = SwapCall {
            commands: Bytes::from(vec![0x00]),
            inputs: vec![Bytes::from(vec![0x01])],
            deadline: U256::from(NOW + 60),
        }
        .encode();

        let inv = invoice(usdc(), 3_500_000);
        router
            .settle(
                &mut bank,
                CallContext::new(payer()),
                &inv,
                dai(),
                U256::from(4_000_000u64),
                &swap_data,
                payer(),
            )
            .unwrap();

        assert_eq!(bank.balance_of(usdc(), merchant()), U256::from(3_500_000u64));
        assert_eq!(bank.balance_of(usdc(), payer()), U256::from(100_000u64));
        assert_eq!(bank.balance_of(dai(), payer()), U256::from(100_000u64));
        assert_eq!(bank.balance_of(usdc(), router_addr()), U256::ZERO);
        assert_eq!(bank.balance_of(dai(), router_addr()), U256::ZERO);

        // Unlimited bootstrap to the manager, bounded grant to the DEX.
        assert_eq!(
            bank.allowance(dai(), router_addr(), permit2()),
            U256::MAX
        );
        let grants = bank.grants();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].spender, dex());
        assert_eq!(grants[0].amount, U256::from(4_000_000u64));
        assert_eq!(grants[0].expires_at, NOW + SWAP_ALLOWANCE_TTL_SECS);
    }

    #[test]
    fn manager_bootstrap_happens_once_per_token() {
        let router = router();
        let mut bank = bank();
        bank.mint(dai(), payer(), U256::from(8_000_000u64));
        bank.set_allowance(dai(), payer(), router_addr(), U256::MAX);
        bank.program_swap(SwapProgram {
            token_in: dai(),
            token_out: usdc(),
            consume: U256::from(4_000_000u64),
            produce: U256::from(3_500_000u64),
        });
        let swap_data = SwapCall {
            commands: Bytes::from(vec![0x00]),
            inputs: vec![],
            deadline: U256::from(NOW + 60),
        }
        .encode();

        for nonce in 1u64..=2 {
            let mut inv = invoice(usdc(), 3_500_000);
            inv.nonce = U256::from(nonce);
            router
                .settle(
                    &mut bank,
                    CallContext::new(payer()),
                    &inv,
                    dai(),
                    U256::from(4_000_000u64),
                    &swap_data,
                    payer(),
                )
                .unwrap();
        }

        // Two settlements: two bounded grants, one bootstrap.
        assert_eq!(bank.grants().len(), 2);
        assert_eq!(bank.allowance(dai(), router_addr(), permit2()), U256::MAX);
    }

    #[test]
    fn swap_shortfall_rejected_and_rolled_back() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, dai(), 4_000_000);
        bank.program_swap(SwapProgram {
            token_in: dai(),
            token_out: usdc(),
            consume: U256::from(4_000_000u64),
            produce: U256::from(3_000_000u64),
        });
        let swap_data = SwapCall {
            commands: Bytes::from(vec![0x00]),
            inputs: vec![],
            deadline: U256::from(NOW + 60),
        }
        .encode();

        let inv = invoice(usdc(), 3_500_000);
        let result = router.settle(
            &mut bank,
            CallContext::new(payer()),
            &inv,
            dai(),
            U256::from(4_000_000u64),
            &swap_data,
            payer(),
        );
        assert_eq!(
            result,
            Err(SettleError::SwapOutputInsufficient {
                required: U256::from(3_500_000u64),
                produced: U256::from(3_000_000u64),
            })
        );
        // The payer keeps their DAI and the invoice can be retried.
        assert_eq!(bank.balance_of(dai(), payer()), U256::from(4_000_000u64));
        assert!(!router.is_settled(&inv));
    }

    #[test]
    fn bridge_settlement_pays_merchant_and_refunds_payer() {
        let router = router();
        let mut bank = bank();
        // The bridge executor delivered funds to the router beforehand.
        bank.mint(usdc(), router_addr(), U256::from(5_000_000u64));

        let inv = invoice(usdc(), 3_500_000);
        router
            .settle_from_bridge(
                &mut bank,
                CallContext::new(executor()),
                &inv,
                usdc(),
                U256::from(5_000_000u64),
                &[],
                payer(),
            )
            .unwrap();

        assert_eq!(bank.balance_of(usdc(), merchant()), U256::from(3_500_000u64));
        assert_eq!(bank.balance_of(usdc(), payer()), U256::from(1_500_000u64));
        assert_eq!(bank.balance_of(usdc(), executor()), U256::ZERO);

        let events = router.events();
        let payment = events
            .iter()
            .find_map(RouterEvent::as_payment)
            .expect("payment event");
        // The recorded payer is the refund recipient, not the executor.
        assert_eq!(payment.payer, payer());
        let bridge = events
            .iter()
            .find_map(RouterEvent::as_bridge_settlement)
            .expect("bridge settlement event");
        assert_eq!(bridge.receiver, merchant());
        assert_eq!(bridge.amountIn, U256::from(5_000_000u64));
    }

    #[test]
    fn bridge_requires_delivered_balance() {
        let router = router();
        let mut bank = bank();
        bank.mint(usdc(), router_addr(), U256::from(1_000_000u64));

        let inv = invoice(usdc(), 3_500_000);
        let result = router.settle_from_bridge(
            &mut bank,
            CallContext::new(executor()),
            &inv,
            usdc(),
            U256::from(5_000_000u64),
            &[],
            payer(),
        );
        assert_eq!(
            result,
            Err(SettleError::InsufficientInput {
                required: U256::from(5_000_000u64),
                available: U256::from(1_000_000u64),
            })
        );
    }

    #[test]
    fn native_settlement_wraps_everything() {
        let router = router();
        let mut bank = bank();
        let one_eth = U256::from(10u64).pow(U256::from(18u64));
        bank.mint_native(payer(), one_eth);

        let inv = Invoice {
            receiver: merchant(),
            tokenOut: weth(),
            amountOut: one_eth,
            deadline: U256::ZERO,
            reference: B256::ZERO,
            nonce: U256::from(1u64),
        };
        router
            .settle_native(
                &mut bank,
                CallContext::with_value(payer(), one_eth),
                &inv,
                &[],
                payer(),
            )
            .unwrap();

        assert_eq!(bank.balance_of(weth(), merchant()), one_eth);
        assert_eq!(bank.native_balance_of(router_addr()), U256::ZERO);
        assert_eq!(bank.native_balance_of(payer()), U256::ZERO);
    }

    #[test]
    fn batch_settles_shared_token_out() {
        let router = router();
        router
            .set_fee_config(CallContext::new(deployer()), fee_sink(), 100)
            .unwrap();
        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 6_500_000);

        let other_merchant = address!("0x00000000000000000000000000000000000000ab");
        let mut first = invoice(usdc(), 2_000_000);
        let mut second = invoice(usdc(), 4_000_000);
        second.receiver = other_merchant;
        second.nonce = U256::from(2u64);
        first.nonce = U256::from(3u64);

        let ids = router
            .settle_batch(
                &mut bank,
                CallContext::new(payer()),
                &[first.clone(), second.clone()],
                usdc(),
                U256::from(6_500_000u64),
                &[],
                payer(),
            )
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(router.is_settled(&first));
        assert!(router.is_settled(&second));

        // 1% fee on each payout.
        assert_eq!(bank.balance_of(usdc(), merchant()), U256::from(1_980_000u64));
        assert_eq!(
            bank.balance_of(usdc(), other_merchant),
            U256::from(3_960_000u64)
        );
        assert_eq!(bank.balance_of(usdc(), fee_sink()), U256::from(60_000u64));
        // Input dust flows back after the loop.
        assert_eq!(bank.balance_of(usdc(), payer()), U256::from(500_000u64));
        assert_eq!(bank.balance_of(usdc(), router_addr()), U256::ZERO);

        let events = router.events();
        assert_eq!(
            events.iter().filter(|e| e.as_payment().is_some()).count(),
            2
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, RouterEvent::BatchSettled(b) if b.count == U256::from(2u64))));
    }

    #[test]
    fn batch_rejects_empty_and_mismatched() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 5_000_000);

        let empty: &[Invoice] = &[];
        assert_eq!(
            router.settle_batch(
                &mut bank,
                CallContext::new(payer()),
                empty,
                usdc(),
                U256::from(5_000_000u64),
                &[],
                payer(),
            ),
            Err(SettleError::BatchEmpty)
        );

        let first = invoice(usdc(), 1_000_000);
        let mut second = invoice(dai(), 1_000_000);
        second.nonce = U256::from(2u64);
        assert_eq!(
            router.settle_batch(
                &mut bank,
                CallContext::new(payer()),
                &[first.clone(), second],
                usdc(),
                U256::from(5_000_000u64),
                &[],
                payer(),
            ),
            Err(SettleError::TokenOutMismatch {
                expected: usdc(),
                found: dai(),
            })
        );
        // Coherence fails before any state change.
        assert_eq!(bank.balance_of(usdc(), payer()), U256::from(5_000_000u64));
        assert!(!router.is_settled(&first));
    }

    #[test]
    fn batch_with_duplicate_invoice_rolls_back_entirely() {
        let router = router();
        let mut bank = bank();
        fund_and_approve(&mut bank, usdc(), 4_000_000);

        let inv = invoice(usdc(), 1_000_000);
        let result = router.settle_batch(
            &mut bank,
            CallContext::new(payer()),
            &[inv.clone(), inv.clone()],
            usdc(),
            U256::from(4_000_000u64),
            &[],
            payer(),
        );
        assert_eq!(result, Err(SettleError::AlreadySettled(inv.id())));
        // Nothing settled, nothing moved: the first leg was undone too.
        assert!(!router.is_settled(&inv));
        assert_eq!(bank.balance_of(usdc(), payer()), U256::from(4_000_000u64));
        assert_eq!(bank.balance_of(usdc(), merchant()), U256::ZERO);
    }

    #[test]
    fn fee_config_enforces_ceiling_and_ownership() {
        let router = router();
        assert_eq!(
            router.set_fee_config(CallContext::new(deployer()), fee_sink(), 101),
            Err(SettleError::FeeTooHigh(101))
        );
        assert_eq!(
            router.set_fee_config(CallContext::new(payer()), fee_sink(), 10),
            Err(SettleError::Unauthorized { caller: payer() })
        );
        router
            .set_fee_config(CallContext::new(deployer()), fee_sink(), 100)
            .unwrap();
        assert_eq!(router.fee_config().bps, 100);

        // Zero bps with a recipient set deducts nothing.
        router
            .set_fee_config(CallContext::new(deployer()), fee_sink(), 0)
            .unwrap();
        assert_eq!(router.fee_config().fee_on(U256::from(1_000_000u64)), U256::ZERO);
    }

    #[test]
    fn ownership_transfer_and_admin_gating() {
        let router = router();
        assert_eq!(
            router.transfer_ownership(CallContext::new(deployer()), Address::ZERO),
            Err(SettleError::ZeroAddress)
        );
        router
            .transfer_ownership(CallContext::new(deployer()), payer())
            .unwrap();
        assert_eq!(router.owner(), payer());
        // The previous owner lost its powers.
        assert_eq!(
            router.set_dex_router(CallContext::new(deployer()), dex()),
            Err(SettleError::Unauthorized { caller: deployer() })
        );
        assert_eq!(
            router.set_dex_router(CallContext::new(payer()), Address::ZERO),
            Err(SettleError::ZeroAddress)
        );

        let events = router.events();
        let transfers: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RouterEvent::OwnershipTransferred(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].previousOwner, Address::ZERO);
        assert_eq!(transfers[1].newOwner, payer());
    }

    #[test]
    fn rescue_recovers_stranded_funds() {
        let router = router();
        let mut bank = bank();
        bank.mint(usdc(), router_addr(), U256::from(123u64));
        bank.mint_native(router_addr(), U256::from(456u64));

        assert_eq!(
            router.rescue(
                &mut bank,
                CallContext::new(payer()),
                usdc(),
                payer(),
                U256::from(123u64)
            ),
            Err(SettleError::Unauthorized { caller: payer() })
        );
        router
            .rescue(
                &mut bank,
                CallContext::new(deployer()),
                usdc(),
                deployer(),
                U256::from(123u64),
            )
            .unwrap();
        router
            .rescue_native(
                &mut bank,
                CallContext::new(deployer()),
                deployer(),
                U256::from(456u64),
            )
            .unwrap();
        assert_eq!(bank.balance_of(usdc(), deployer()), U256::from(123u64));
        assert_eq!(bank.native_balance_of(deployer()), U256::from(456u64));
    }

    /// A token environment whose first merchant payout re-enters the router,
    /// the way a malicious ERC-20 with transfer hooks would.
    struct ReentrantBank {
        inner: InMemoryBank,
        router: Rc<SettlementRouter>,
        attack: Option<Invoice>,
        observed: Option<SettleError>,
    }

    impl Bank for ReentrantBank {
        type Checkpoint = InMemoryBank;

        fn checkpoint(&self) -> Self::Checkpoint {
            self.inner.checkpoint()
        }
        fn revert(&mut self, checkpoint: Self::Checkpoint) {
            self.inner.revert(checkpoint)
        }
        fn timestamp(&self) -> u64 {
            self.inner.timestamp()
        }
        fn balance_of(&self, token: Address, holder: Address) -> U256 {
            self.inner.balance_of(token, holder)
        }
        fn native_balance_of(&self, holder: Address) -> U256 {
            self.inner.native_balance_of(holder)
        }

        fn transfer(
            &mut self,
            token: Address,
            from: Address,
            to: Address,
            amount: U256,
        ) -> Result<(), BankError> {
            if let Some(invoice) = self.attack.take() {
                let router = Rc::clone(&self.router);
                let result = router.settle(
                    self,
                    CallContext::new(payer()),
                    &invoice,
                    usdc(),
                    invoice.amountOut,
                    &[],
                    payer(),
                );
                self.observed = result.err();
            }
            self.inner.transfer(token, from, to, amount)
        }

        fn transfer_from(
            &mut self,
            token: Address,
            spender: Address,
            from: Address,
            to: Address,
            amount: U256,
        ) -> Result<(), BankError> {
            self.inner.transfer_from(token, spender, from, to, amount)
        }
        fn transfer_native(
            &mut self,
            from: Address,
            to: Address,
            amount: U256,
        ) -> Result<(), BankError> {
            self.inner.transfer_native(from, to, amount)
        }
        fn wrap_native(
            &mut self,
            wrapped: Address,
            holder: Address,
            amount: U256,
        ) -> Result<(), BankError> {
            self.inner.wrap_native(wrapped, holder, amount)
        }
        fn approve(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
            self.inner.approve(token, owner, spender, amount)
        }
        fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
            self.inner.allowance(token, owner, spender)
        }
        fn approve_with_expiry(
            &mut self,
            manager: Address,
            token: Address,
            owner: Address,
            spender: Address,
            amount: U256,
            expires_at: u64,
        ) {
            self.inner
                .approve_with_expiry(manager, token, owner, spender, amount, expires_at)
        }
        fn execute_swap(
            &mut self,
            dex_router: Address,
            caller: Address,
            call: &SwapCall,
        ) -> Result<(), BankError> {
            self.inner.execute_swap(dex_router, caller, call)
        }
    }

    #[test]
    fn reentrant_callback_is_refused() {
        let router = Rc::new(router());
        let mut inner = bank();
        inner.mint(usdc(), payer(), U256::from(4_000_000u64));
        inner.set_allowance(usdc(), payer(), router_addr(), U256::MAX);

        let mut second = invoice(usdc(), 1_000_000);
        second.nonce = U256::from(99u64);

        let mut bank = ReentrantBank {
            inner,
            router: Rc::clone(&router),
            attack: Some(second.clone()),
            observed: None,
        };

        let inv = invoice(usdc(), 2_000_000);
        router
            .settle(
                &mut bank,
                CallContext::new(payer()),
                &inv,
                usdc(),
                U256::from(2_000_000u64),
                &[],
                payer(),
            )
            .unwrap();

        // The nested call was refused by the guard; the outer settlement
        // completed untouched.
        assert_eq!(bank.observed, Some(SettleError::Reentrancy));
        assert!(router.is_settled(&inv));
        assert!(!router.is_settled(&second));
        assert_eq!(
            bank.inner.balance_of(usdc(), merchant()),
            U256::from(2_000_000u64)
        );
    }
}
