//! The token environment the settlement router executes against.
//!
//! On-chain, the router's effects are ERC-20 calls, a wrapped-native
//! deposit, allowance-manager approvals, and one opaque DEX invocation. The
//! [`Bank`] trait captures exactly that surface so the engine's semantics
//! can run unchanged against an in-memory double ([`InMemoryBank`]) in
//! tests. Checkpoint/revert models per-transaction atomicity: the engine
//! snapshots the bank at entry and restores it when a settlement aborts.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolValue;
use std::collections::HashMap;

use crate::error::SettleError;

/// Failures surfaced by the token environment. On-chain these are reverts or
/// `false` returns from token calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BankError {
    #[error("token {token} balance of {holder} is {available}, needed {needed}")]
    InsufficientBalance {
        token: Address,
        holder: Address,
        needed: U256,
        available: U256,
    },
    #[error("token {token} allowance {owner} -> {spender} is {available}, needed {needed}")]
    InsufficientAllowance {
        token: Address,
        owner: Address,
        spender: Address,
        needed: U256,
        available: U256,
    },
    #[error("native balance of {holder} is {available}, needed {needed}")]
    InsufficientNative {
        holder: Address,
        needed: U256,
        available: U256,
    },
    #[error("swap reverted: {0}")]
    SwapReverted(String),
}

/// The decoded outer triple of a swap-data blob.
///
/// The DEX router's command stream is intentionally opaque: the client
/// builds it off-chain and the router decodes only `(commands, inputs[],
/// deadline)` before invoking the DEX's execute entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapCall {
    pub commands: Bytes,
    pub inputs: Vec<Bytes>,
    pub deadline: U256,
}

impl SwapCall {
    /// Decodes a swap-data blob. The blob must be the ABI parameter encoding
    /// of `(bytes, bytes[], uint256)`.
    pub fn decode(data: &[u8]) -> Result<Self, SettleError> {
        let (commands, inputs, deadline) = <(Bytes, Vec<Bytes>, U256)>::abi_decode_params(data)
            .map_err(|err| SettleError::InvalidSwapData(err.to_string()))?;
        Ok(Self {
            commands,
            inputs,
            deadline,
        })
    }

    /// ABI parameter encoding of the outer triple, as the client produces it.
    pub fn encode(&self) -> Vec<u8> {
        (
            self.commands.clone(),
            self.inputs.clone(),
            self.deadline,
        )
            .abi_encode_params()
    }
}

/// The external surface the settlement router touches.
///
/// `Checkpoint` captures the full bank state; [`Bank::revert`] restores it.
/// Implementations must make `checkpoint` + `revert` a faithful undo, since
/// the engine relies on them for transaction atomicity.
pub trait Bank {
    type Checkpoint;

    fn checkpoint(&self) -> Self::Checkpoint;
    fn revert(&mut self, checkpoint: Self::Checkpoint);

    /// Current block timestamp in unix seconds.
    fn timestamp(&self) -> u64;

    fn balance_of(&self, token: Address, holder: Address) -> U256;
    fn native_balance_of(&self, holder: Address) -> U256;

    /// Direct ERC-20 transfer out of `from`'s balance.
    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), BankError>;

    /// `transferFrom` executed by `spender`, consuming its allowance.
    fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), BankError>;

    fn transfer_native(
        &mut self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), BankError>;

    /// Wrapped-native deposit: converts `amount` of `holder`'s native
    /// balance into the wrapped token.
    fn wrap_native(
        &mut self,
        wrapped: Address,
        holder: Address,
        amount: U256,
    ) -> Result<(), BankError>;

    /// Plain ERC-20 approval granted by `owner`.
    fn approve(&mut self, token: Address, owner: Address, spender: Address, amount: U256);

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256;

    /// Short-lived bounded approval issued through the delegated allowance
    /// manager on behalf of `owner`.
    fn approve_with_expiry(
        &mut self,
        manager: Address,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
        expires_at: u64,
    );

    /// Invokes the DEX router's execute entrypoint with a decoded swap call,
    /// moving balances of `caller` according to the route.
    fn execute_swap(
        &mut self,
        dex_router: Address,
        caller: Address,
        call: &SwapCall,
    ) -> Result<(), BankError>;
}

/// A bounded approval recorded by the allowance manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowanceGrant {
    pub manager: Address,
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
    pub expires_at: u64,
}

/// A programmed swap outcome for [`InMemoryBank`]: consume `consume` of
/// `token_in` from the caller and credit `produce` of `token_out`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapProgram {
    pub token_in: Address,
    pub token_out: Address,
    pub consume: U256,
    pub produce: U256,
}

/// In-memory token environment for exercising the engine without a chain.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBank {
    now: u64,
    balances: HashMap<(Address, Address), U256>,
    native: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    grants: Vec<AllowanceGrant>,
    swap: Option<SwapProgram>,
}

impl InMemoryBank {
    pub fn new(now: u64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn set_timestamp(&mut self, now: u64) {
        self.now = now;
    }

    pub fn mint(&mut self, token: Address, holder: Address, amount: U256) {
        let balance = self.balances.entry((token, holder)).or_default();
        *balance += amount;
    }

    pub fn mint_native(&mut self, holder: Address, amount: U256) {
        let balance = self.native.entry(holder).or_default();
        *balance += amount;
    }

    pub fn set_allowance(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((token, owner, spender), amount);
    }

    /// Programs the outcome of the next (and every) DEX invocation.
    pub fn program_swap(&mut self, program: SwapProgram) {
        self.swap = Some(program);
    }

    /// Bounded approvals issued through the allowance manager so far.
    pub fn grants(&self) -> &[AllowanceGrant] {
        &self.grants
    }

    fn debit(
        &mut self,
        token: Address,
        holder: Address,
        amount: U256,
    ) -> Result<(), BankError> {
        let balance = self.balances.entry((token, holder)).or_default();
        if *balance < amount {
            return Err(BankError::InsufficientBalance {
                token,
                holder,
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }
}

impl Bank for InMemoryBank {
    type Checkpoint = InMemoryBank;

    fn checkpoint(&self) -> Self::Checkpoint {
        self.clone()
    }

    fn revert(&mut self, checkpoint: Self::Checkpoint) {
        *self = checkpoint;
    }

    fn timestamp(&self) -> u64 {
        self.now
    }

    fn balance_of(&self, token: Address, holder: Address) -> U256 {
        self.balances
            .get(&(token, holder))
            .copied()
            .unwrap_or_default()
    }

    fn native_balance_of(&self, holder: Address) -> U256 {
        self.native.get(&holder).copied().unwrap_or_default()
    }

    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), BankError> {
        self.debit(token, from, amount)?;
        self.mint(token, to, amount);
        Ok(())
    }

    fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), BankError> {
        let allowance = self.allowance(token, from, spender);
        if allowance < amount {
            return Err(BankError::InsufficientAllowance {
                token,
                owner: from,
                spender,
                needed: amount,
                available: allowance,
            });
        }
        if allowance != U256::MAX {
            self.allowances
                .insert((token, from, spender), allowance - amount);
        }
        self.transfer(token, from, to, amount)
    }

    fn transfer_native(
        &mut self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), BankError> {
        let balance = self.native.entry(from).or_default();
        if *balance < amount {
            return Err(BankError::InsufficientNative {
                holder: from,
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        self.mint_native(to, amount);
        Ok(())
    }

    fn wrap_native(
        &mut self,
        wrapped: Address,
        holder: Address,
        amount: U256,
    ) -> Result<(), BankError> {
        let balance = self.native.entry(holder).or_default();
        if *balance < amount {
            return Err(BankError::InsufficientNative {
                holder,
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        self.mint(wrapped, holder, amount);
        Ok(())
    }

    fn approve(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((token, owner, spender), amount);
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
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
        self.grants.push(AllowanceGrant {
            manager,
            token,
            owner,
            spender,
            amount,
            expires_at,
        });
    }

    fn execute_swap(
        &mut self,
        _dex_router: Address,
        caller: Address,
        _call: &SwapCall,
    ) -> Result<(), BankError> {
        let program = self
            .swap
            .clone()
            .ok_or_else(|| BankError::SwapReverted("no route programmed".into()))?;
        self.debit(program.token_in, caller, program.consume)?;
        self.mint(program.token_out, caller, program.produce);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn swap_call_round_trips() {
        let call = SwapCall {
            commands: Bytes::from(vec![0x0b, 0x00]),
            inputs: vec![Bytes::from(vec![1, 2, 3]), Bytes::from(vec![4])],
            deadline: U256::from(1_700_000_000u64),
        };
        let encoded = call.encode();
        assert_eq!(SwapCall::decode(&encoded).unwrap(), call);
    }

    #[test]
    fn swap_call_rejects_garbage() {
        assert!(matches!(
            SwapCall::decode(&[0xde, 0xad]),
            Err(SettleError::InvalidSwapData(_))
        ));
    }

    #[test]
    fn transfer_from_consumes_finite_allowance() {
        let token = address!("0x1000000000000000000000000000000000000001");
        let owner = address!("0x2000000000000000000000000000000000000002");
        let spender = address!("0x3000000000000000000000000000000000000003");

        let mut bank = InMemoryBank::new(0);
        bank.mint(token, owner, U256::from(100u64));
        bank.set_allowance(token, owner, spender, U256::from(60u64));

        bank.transfer_from(token, spender, owner, spender, U256::from(40u64))
            .unwrap();
        assert_eq!(bank.allowance(token, owner, spender), U256::from(20u64));

        let err = bank
            .transfer_from(token, spender, owner, spender, U256::from(40u64))
            .unwrap_err();
        assert!(matches!(err, BankError::InsufficientAllowance { .. }));
    }

    #[test]
    fn unlimited_allowance_is_not_consumed() {
        let token = address!("0x1000000000000000000000000000000000000001");
        let owner = address!("0x2000000000000000000000000000000000000002");
        let spender = address!("0x3000000000000000000000000000000000000003");

        let mut bank = InMemoryBank::new(0);
        bank.mint(token, owner, U256::from(100u64));
        bank.set_allowance(token, owner, spender, U256::MAX);
        bank.transfer_from(token, spender, owner, spender, U256::from(100u64))
            .unwrap();
        assert_eq!(bank.allowance(token, owner, spender), U256::MAX);
    }

    #[test]
    fn checkpoint_revert_restores_everything() {
        let token = address!("0x1000000000000000000000000000000000000001");
        let holder = address!("0x2000000000000000000000000000000000000002");

        let mut bank = InMemoryBank::new(7);
        bank.mint(token, holder, U256::from(5u64));
        let checkpoint = bank.checkpoint();

        bank.mint(token, holder, U256::from(100u64));
        bank.mint_native(holder, U256::from(9u64));
        bank.revert(checkpoint);

        assert_eq!(bank.balance_of(token, holder), U256::from(5u64));
        assert_eq!(bank.native_balance_of(holder), U256::ZERO);
    }
}
