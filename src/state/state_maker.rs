//! The [`StateMaker`]: orchestrator of the named sub-ledgers that make up the world state.
//!
//! Each registered [`Dapp`] owns one [`DeltaChain`] whose heights mirror the block chain. The
//! state maker keeps every ledger in lockstep: one checkpoint per block, one branch per
//! reorganisation attempt, one aggregate commitment (the super-state root) that headers pin via
//! `state_mr`.
//!
//! The super-state root is the Merkle root of `[H(name₁), root₁, H(name₂), root₂, …]` with names
//! in byte order. Sorting is mandatory: map iteration order must never leak into a commitment.
//!
//! ## Reorganisation
//!
//! [`reorganisation`](StateMaker::reorganisation) is the central replay algorithm. Given the
//! retained checkpoint at or below the fork point and the ordered block path up to the new head,
//! it opens a trial branch at the checkpoint, replays every block inside the branch (transactions
//! and state-root checks included), and then either hardens the branch, discarding the losing
//! fork's deltas, or discards it, leaving no trace. A dry-run flavour discards even on success,
//! which is how candidate chains are vetted without committing.

use std::collections::BTreeMap;

use crate::crypto::merkle_leaves_to_root;
use crate::errors::{ReorgFailure, ValidationError};
use crate::logging;
use crate::state::dapp::{Dapp, StateView};
use crate::state::delta::{BranchTag, DeltaChain};
use crate::types::basic::CryptoHash;
use crate::types::block::Block;
use crate::types::transaction::SuperTx;

struct Ledger {
    handler: Box<dyn Dapp>,
    chain: DeltaChain,
}

/// Owns one state-delta chain per named sub-ledger and drives checkpointing, replay, and
/// speculative branches across all of them at once.
pub struct StateMaker {
    ledgers: BTreeMap<Vec<u8>, Ledger>,
}

impl StateMaker {
    pub fn new() -> StateMaker {
        StateMaker {
            ledgers: BTreeMap::new(),
        }
    }

    /// Register a sub-ledger under its own name, with a fresh state chain rooted at height zero.
    pub fn register_dapp(&mut self, handler: Box<dyn Dapp>) {
        let name = handler.name().to_vec();
        self.ledgers.insert(
            name,
            Ledger {
                handler,
                chain: DeltaChain::new(),
            },
        );
    }

    /// Direct access to one ledger's state at the active delta. Mostly useful inside a
    /// [`trial_state`](Self::trial_state) for seeding fixtures.
    pub fn state(&mut self, name: &[u8]) -> Option<StateView<'_>> {
        self.ledgers
            .get_mut(name)
            .map(|ledger| StateView::new(&mut ledger.chain))
    }

    /// Height of the active delta: the height of the last block applied.
    pub fn height(&self) -> u64 {
        self.ledgers
            .values()
            .next()
            .map(|ledger| ledger.chain.height())
            .unwrap_or(0)
    }

    /// The aggregate commitment over all sub-ledgers, which a header's `state_mr` pins.
    pub fn super_state_hash(&mut self) -> CryptoHash {
        let mut leaves = Vec::with_capacity(self.ledgers.len() * 2);
        for (name, ledger) in self.ledgers.iter_mut() {
            leaves.push(crate::crypto::global_hash(name));
            leaves.push(ledger.chain.root_hash());
        }
        merkle_leaves_to_root(&leaves)
    }

    /// The deepest retained checkpoint at or below `max_height`, across every ledger.
    pub fn find_prune_point(&self, max_height: u64) -> u64 {
        self.ledgers
            .values()
            .map(|ledger| ledger.chain.find_prune_point(max_height))
            .min()
            .unwrap_or(0)
    }

    /// Rewind every ledger to the retained checkpoint at or below `height`.
    pub fn prune_to_or_beyond(&mut self, height: u64) {
        for ledger in self.ledgers.values_mut() {
            ledger.chain.prune_to_or_beyond(height);
        }
    }

    /// Checkpoint every ledger to the next height. With `hard`, the retention schedule is
    /// applied first.
    pub fn checkpoint(&mut self, hard: bool) {
        for ledger in self.ledgers.values_mut() {
            ledger.chain.checkpoint(hard);
        }
    }

    /// Apply one block on top of the current state: checkpoint, run block hooks and
    /// transactions, and require the resulting super-state root to match the header's
    /// commitment. All-or-nothing: a failure leaves the freshly checkpointed deltas empty.
    pub fn apply_block(
        &mut self,
        block: &Block,
        hard_checkpoint: bool,
    ) -> Result<(), ValidationError> {
        self.checkpoint(hard_checkpoint);
        let result = self.execute_block(block, true).map(|_| ());
        if result.is_err() {
            self.reset_tips();
        }
        result
    }

    /// Apply every transaction bundle to its designated sub-ledger, in order. On any failure the
    /// active deltas are reverted to the last checkpoint and the error re-raised.
    pub fn add_super_txs(&mut self, super_txs: &[SuperTx]) -> Result<(), ValidationError> {
        let result = self.route_super_txs(super_txs);
        if result.is_err() {
            self.reset_tips();
        }
        result
    }

    /// Open a trial branch at the current height: a speculative fork whose writes are discarded
    /// unless [`commit`](StateBranch::commit) is called.
    pub fn trial_state(&mut self) -> StateBranch<'_> {
        let height = self.height();
        self.begin_branches(BranchTag::Trial, height);
        StateBranch {
            maker: self,
            permanent: false,
        }
    }

    /// Open a future branch at the current height, modelling the next block in progress.
    /// Discarded on drop like a trial; callers rebuild it whenever the head changes.
    pub fn future_state(&mut self) -> StateBranch<'_> {
        let height = self.height();
        self.begin_branches(BranchTag::Future, height);
        StateBranch {
            maker: self,
            permanent: false,
        }
    }

    /// Replay `path`, the blocks from the retained checkpoint at `prune_height` (exclusive) up
    /// to the new head (inclusive), inside a trial branch rooted at that checkpoint.
    ///
    /// On success the branch is hardened and the losing fork's deltas are gone; with `is_test`
    /// the branch is discarded even on success (a dry run). On failure nothing survives and the
    /// caller learns which block broke, so it can invalidate that block and its descendants.
    pub fn reorganisation(
        &mut self,
        prune_height: u64,
        path: &[&Block],
        is_test: bool,
    ) -> Result<(), ReorgFailure> {
        self.begin_branches(BranchTag::Trial, prune_height);
        for block in path {
            self.checkpoint(false);
            if let Err(error) = self.execute_block(block, true) {
                self.discard_branches();
                logging::debug_reorg_failed(&block.get_hash(), &error);
                return Err(ReorgFailure {
                    failed_block: block.get_hash(),
                    error,
                });
            }
        }
        if is_test {
            self.discard_branches();
        } else {
            self.commit_branches();
        }
        Ok(())
    }

    /// Run one block's hooks and transactions against the active deltas, and return the
    /// resulting super-state root. With `check_root`, a mismatch against the header's `state_mr`
    /// is an error.
    fn execute_block(
        &mut self,
        block: &Block,
        check_root: bool,
    ) -> Result<CryptoHash, ValidationError> {
        for ledger in self.ledgers.values_mut() {
            let Ledger { handler, chain } = ledger;
            handler.on_block(&mut StateView::new(chain), block)?;
        }
        self.route_super_txs(&block.super_txs)?;
        let root = self.super_state_hash();
        if check_root && root != block.header.state_mr {
            return Err(ValidationError::StateRootMismatch {
                expected: block.header.state_mr,
                actual: root,
            });
        }
        Ok(root)
    }

    fn route_super_txs(&mut self, super_txs: &[SuperTx]) -> Result<(), ValidationError> {
        for super_tx in super_txs {
            for tx in &super_tx.txs {
                let ledger = self
                    .ledgers
                    .get_mut(&tx.dapp)
                    .ok_or_else(|| ValidationError::UnknownDapp(tx.dapp.clone()))?;
                let Ledger { handler, chain } = ledger;
                handler.on_transaction(&mut StateView::new(chain), tx, &super_tx.sender)?;
            }
        }
        Ok(())
    }

    fn reset_tips(&mut self) {
        for ledger in self.ledgers.values_mut() {
            ledger.chain.reset_tip();
        }
    }

    fn begin_branches(&mut self, tag: BranchTag, at_height: u64) {
        for ledger in self.ledgers.values_mut() {
            ledger.chain.begin_branch(tag, at_height);
        }
    }

    fn commit_branches(&mut self) {
        for ledger in self.ledgers.values_mut() {
            ledger.chain.commit_branch();
        }
    }

    fn discard_branches(&mut self) {
        for ledger in self.ledgers.values_mut() {
            ledger.chain.discard_branch();
        }
    }
}

impl Default for StateMaker {
    fn default() -> Self {
        StateMaker::new()
    }
}

/// A scoped alternate-state branch with guaranteed cleanup.
///
/// Dropping the guard discards the branch unless [`commit`](Self::commit) was called first,
/// so an early return or propagated error can never leave a half-applied state visible.
pub struct StateBranch<'a> {
    maker: &'a mut StateMaker,
    permanent: bool,
}

impl<'a> StateBranch<'a> {
    /// Access one ledger's state inside the branch.
    pub fn state(&mut self, name: &[u8]) -> Option<StateView<'_>> {
        self.maker.state(name)
    }

    /// Apply a block inside the branch, state-root check included.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), ValidationError> {
        self.maker.checkpoint(false);
        let result = self.maker.execute_block(block, true).map(|_| ());
        if result.is_err() {
            self.maker.reset_tips();
        }
        result
    }

    /// Apply a block inside the branch without checking its state root, returning the root the
    /// replay produced. Used to compute the commitment for a candidate block before it exists.
    pub fn apply_block_unchecked(&mut self, block: &Block) -> Result<CryptoHash, ValidationError> {
        self.maker.checkpoint(false);
        let result = self.maker.execute_block(block, false);
        if result.is_err() {
            self.maker.reset_tips();
        }
        result
    }

    /// Apply transaction bundles inside the branch.
    pub fn add_super_txs(&mut self, super_txs: &[SuperTx]) -> Result<(), ValidationError> {
        self.maker.add_super_txs(super_txs)
    }

    pub fn super_state_hash(&mut self) -> CryptoHash {
        self.maker.super_state_hash()
    }

    /// Mark the branch permanent: on drop it is hardened instead of discarded.
    pub fn commit(mut self) {
        self.permanent = true;
    }
}

impl Drop for StateBranch<'_> {
    fn drop(&mut self) {
        if self.permanent {
            self.maker.commit_branches();
        } else {
            self.maker.discard_branches();
        }
    }
}
