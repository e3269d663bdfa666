//! Sub-ledgers ("dapps") and the capability interface they implement.
//!
//! The [`StateMaker`](crate::state::state_maker::StateMaker) routes block and transaction events
//! to handlers registered under a name. A handler never touches a [`DeltaChain`] directly: it
//! gets a [`StateView`] scoped to its own ledger, so checkpointing and branching stay under the
//! state maker's control.

use crate::errors::ValidationError;
use crate::state::delta::DeltaChain;
use crate::types::block::Block;
use crate::types::transaction::Tx;

/// A mutable window onto one sub-ledger's state at the currently active delta.
pub struct StateView<'a> {
    chain: &'a mut DeltaChain,
}

impl<'a> StateView<'a> {
    pub(crate) fn new(chain: &'a mut DeltaChain) -> StateView<'a> {
        StateView { chain }
    }

    /// An absent or tombstoned key reads as the empty value.
    pub fn get(&self, key: &[u8]) -> Vec<u8> {
        self.chain.get(key)
    }

    pub fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.chain.set(key, value)
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.chain.delete(key)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.chain.contains_key(key)
    }

    /// Read a big-endian u64, treating absent or malformed entries as zero.
    pub fn get_u64(&self, key: &[u8]) -> u64 {
        let bytes = self.chain.get(key);
        match <[u8; 8]>::try_from(bytes.as_slice()) {
            Ok(array) => u64::from_be_bytes(array),
            Err(_) => 0,
        }
    }

    /// Write a big-endian u64. Zero deletes the entry, keeping the sparse-state convention that
    /// absent means zero.
    pub fn set_u64(&mut self, key: &[u8], value: u64) {
        if value == 0 {
            self.chain.delete(key);
        } else {
            self.chain.set(key, value.to_be_bytes().to_vec());
        }
    }
}

/// The capability interface a sub-ledger implements.
///
/// New sub-ledgers are added by implementing this trait and registering the handler under its
/// name, never by reaching into another ledger's state.
pub trait Dapp: Send + 'static {
    /// The name this ledger is registered and addressed under.
    fn name(&self) -> &[u8];

    /// Called once per block, before the block's transactions are applied.
    fn on_block(&mut self, state: &mut StateView, block: &Block) -> Result<(), ValidationError> {
        let _ = (state, block);
        Ok(())
    }

    /// Apply one transaction. `sender` is the account the authorizing signature spends from.
    fn on_transaction(
        &mut self,
        state: &mut StateView,
        tx: &Tx,
        sender: &[u8],
    ) -> Result<(), ValidationError>;
}

/// The minimal built-in transfer ledger.
///
/// Balances are keyed by account bytes. A transaction moves `value` from the sender to the
/// account named by `data[0]` and burns `fee`. Registered under the empty name, the root
/// namespace.
pub struct TxPrism;

impl Dapp for TxPrism {
    fn name(&self) -> &[u8] {
        b""
    }

    fn on_transaction(
        &mut self,
        state: &mut StateView,
        tx: &Tx,
        sender: &[u8],
    ) -> Result<(), ValidationError> {
        let recipient = tx
            .data
            .first()
            .ok_or(ValidationError::MalformedTransaction("missing recipient"))?;

        let debit = tx
            .value
            .checked_add(tx.fee)
            .ok_or(ValidationError::MalformedTransaction("value overflow"))?;
        let sender_balance = state.get_u64(sender);
        if sender_balance < debit {
            return Err(ValidationError::InsufficientBalance);
        }

        if recipient.as_slice() == sender {
            state.set_u64(sender, sender_balance - tx.fee);
        } else {
            let credited = state
                .get_u64(recipient)
                .checked_add(tx.value)
                .ok_or(ValidationError::MalformedTransaction("balance overflow"))?;
            state.set_u64(sender, sender_balance - debit);
            state.set_u64(recipient, credited);
        }
        Ok(())
    }
}
