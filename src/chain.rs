//! The fork-choice engine.
//!
//! The [`Chain`] tracks every known valid block, selects the best chain by cumulative difficulty
//! ("sigma-diff"), and drives reorganisations. Its head invariant: after every successful add or
//! reorg, the head is the block with the maximum `(sigma_diff, hash)` among all known,
//! non-invalidated blocks.
//!
//! A block's presence in the index implies its ancestors down to genesis are present too:
//! partial chains with missing parents wait in the acquisition pipeline
//! ([`SeekNBuild`](crate::sync::SeekNBuild)), never here.
//!
//! The chain also owns the single [`StateMaker`] execution context. Conceptually the context
//! belongs to the head block, exclusively, for as long as it is the head; a successful
//! reorganisation hands it to the new head and the old head relinquishes it. Holding it here
//! keeps that hand-off atomic under the chain's single mutation lock.
//!
//! ## Failure handling
//!
//! Fork choice is optimistic: a block can enter the index and only later be exposed as invalid,
//! when a reorganisation actually replays it against state. When that happens the failed block
//! and all of its known descendants are removed ([`recursively_mark_invalid`]
//! (Chain::recursively_mark_invalid)), and [`construct_best_chain`](Chain::construct_best_chain)
//! re-selects the next-best candidate, cascading further if that one also fails. The head is
//! always left on some previously accepted chain, never in a half-applied state.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::crypto::{merkle_leaves_to_root, target_to_diff};
use crate::database::Database;
use crate::errors::{ChainError, ReorgFailure, ValidationError};
use crate::logging;
use crate::state::state_maker::StateMaker;
use crate::types::basic::{BlockHeight, CryptoHash, SigmaDiff};
use crate::types::block::{expected_target, Block, Header, PROTOCOL_VERSION};
use crate::types::transaction::SuperTx;

/// Why an attempted head switch was abandoned.
enum SetHeadFailure {
    /// Chain bookkeeping broke down (no LCA, missing block on the path).
    Bookkeeping(ChainError),
    /// Replay rejected a block; the named block and its descendants are poisoned.
    Replay(ReorgFailure),
}

/// A proof-of-work blockchain: the set of known blocks, the current best head, and the state
/// execution context bound to it.
pub struct Chain<D: Database> {
    db: D,
    blocks: HashMap<CryptoHash, Block>,
    /// Blacklist. Membership poisons all descendants.
    invalid_block_hashes: HashSet<CryptoHash>,
    /// Active blocks ordered by `(sigma_diff, hash)`; the last entry is the best candidate.
    block_hashes_with_priority: BTreeSet<(SigmaDiff, CryptoHash)>,
    head: Option<CryptoHash>,
    genesis_block: Option<CryptoHash>,
    state_maker: StateMaker,
    /// Raised whenever the head changes, so a miner can abandon its stale candidate.
    miner_restart: Arc<AtomicBool>,
}

impl<D: Database> Chain<D> {
    /// A chain with no genesis yet. `state_maker` carries the registered sub-ledgers, with all
    /// state chains at height zero.
    pub fn new(db: D, state_maker: StateMaker) -> Chain<D> {
        Chain {
            db,
            blocks: HashMap::new(),
            invalid_block_hashes: HashSet::new(),
            block_hashes_with_priority: BTreeSet::new(),
            head: None,
            genesis_block: None,
            state_maker,
            miner_restart: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a genesis block has been accepted.
    pub fn initialized(&self) -> bool {
        self.genesis_block.is_some()
    }

    pub fn head(&self) -> Option<&Block> {
        self.head.and_then(|hash| self.blocks.get(&hash))
    }

    pub fn head_hash(&self) -> Option<CryptoHash> {
        self.head
    }

    pub fn genesis(&self) -> Option<&Block> {
        self.genesis_block.and_then(|hash| self.blocks.get(&hash))
    }

    /// Height of the head; zero before initialization.
    pub fn get_height(&self) -> BlockHeight {
        self.head()
            .map(|block| block.height())
            .unwrap_or(BlockHeight::new(0))
    }

    pub fn has_block_hash(&self, hash: &CryptoHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn get_block(&self, hash: &CryptoHash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    /// The skip list a child of `block_hash` must carry, from the ancestor index.
    pub fn get_ancestors(&self, block_hash: &CryptoHash) -> Vec<CryptoHash> {
        self.db.get_ancestors(block_hash)
    }

    /// The flag a miner should watch: set on every head change, cleared by the miner.
    pub fn miner_restart_flag(&self) -> Arc<AtomicBool> {
        self.miner_restart.clone()
    }

    /// Accept the genesis block. Fails if one is already known or the block breaks a
    /// genesis-only rule.
    pub fn set_genesis(&mut self, block: Block, now: u64) -> Result<(), ChainError> {
        if let Some(existing) = self.genesis_block {
            return Err(ChainError::GenesisAlreadyKnown(existing));
        }
        block
            .assert_validity(self, now)
            .map_err(ChainError::InvalidGenesis)?;

        let hash = block.get_hash();
        self.db.set(hash, block.serialize());
        self.db.set_ancestors(&block);
        self.block_hashes_with_priority
            .insert((block.header.sigma_diff, hash));
        self.blocks.insert(hash, block);
        self.genesis_block = Some(hash);
        self.head = Some(hash);
        logging::info_set_genesis(&hash);
        self.restart_miner();
        Ok(())
    }

    /// Add a validated block to the index and re-select the head if it is better.
    ///
    /// Idempotent: a block already known (or already blacklisted) is a no-op returning `false`.
    /// A block whose parent is blacklisted is itself blacklisted and not stored. Returns `true`
    /// if the block entered the active index.
    pub fn add_block(&mut self, block: Block) -> Result<bool, ChainError> {
        if !self.initialized() {
            return Err(ChainError::NotInitialized);
        }
        let hash = block.get_hash();
        if self.blocks.contains_key(&hash) || self.invalid_block_hashes.contains(&hash) {
            return Ok(false);
        }
        if self.invalid_block_hashes.contains(&block.parent_hash()) {
            self.invalid_block_hashes.insert(hash);
            logging::info_mark_invalid(&hash);
            return Ok(false);
        }

        self.db.set(hash, block.serialize());
        self.db.set_ancestors(&block);
        self.block_hashes_with_priority
            .insert((block.header.sigma_diff, hash));
        let is_better = block.better_than(self.head());
        logging::info_add_block(&hash, block.height());
        self.blocks.insert(hash, block);

        if is_better {
            self.set_head(hash)?;
        }
        self.restart_miner();
        Ok(true)
    }

    /// Make `new_head` the head, replaying state across the fork. On failure the offending
    /// branch is invalidated and the best remaining chain re-selected; the returned error is
    /// reserved for unrecoverable conditions (no candidate left at all).
    pub fn set_head(&mut self, new_head: CryptoHash) -> Result<(), ChainError> {
        match self.try_reorg_to(new_head, false) {
            Ok(()) => {
                self.head = Some(new_head);
                let height = self.get_height();
                logging::info_new_head(&new_head, height);
                Ok(())
            }
            Err(SetHeadFailure::Bookkeeping(error)) => {
                logging::debug_builder_error(&error);
                self.recursively_mark_invalid(&new_head);
                self.construct_best_chain()
            }
            Err(SetHeadFailure::Replay(failure)) => {
                self.recursively_mark_invalid(&failure.failed_block);
                self.construct_best_chain()
            }
        }
    }

    /// Repeatedly take the best `(sigma_diff, hash)` candidate and try to make it head,
    /// invalidating failures, until the head stabilizes.
    pub fn construct_best_chain(&mut self) -> Result<(), ChainError> {
        loop {
            let best = self
                .block_hashes_with_priority
                .iter()
                .next_back()
                .map(|(_, hash)| *hash)
                .ok_or(ChainError::NoValidCandidate)?;
            if Some(best) == self.head {
                return Ok(());
            }
            match self.try_reorg_to(best, false) {
                Ok(()) => {
                    self.head = Some(best);
                    let height = self.get_height();
                    logging::info_new_head(&best, height);
                    return Ok(());
                }
                Err(SetHeadFailure::Bookkeeping(error)) => {
                    logging::debug_builder_error(&error);
                    self.recursively_mark_invalid(&best);
                }
                Err(SetHeadFailure::Replay(failure)) => {
                    self.recursively_mark_invalid(&failure.failed_block);
                }
            }
        }
    }

    /// Rewind state to a retained checkpoint below the fork point and replay up to `new_head`,
    /// committing only on success. With `is_test`, the replay is a dry run: state is left
    /// untouched either way.
    fn try_reorg_to(&mut self, new_head: CryptoHash, is_test: bool) -> Result<(), SetHeadFailure> {
        let old_head = self
            .head
            .ok_or(SetHeadFailure::Bookkeeping(ChainError::NotInitialized))?;
        if old_head == new_head {
            return Ok(());
        }

        let around = self
            .find_lca(&old_head, &new_head)
            .map_err(SetHeadFailure::Bookkeeping)?;
        let around_height = self
            .blocks
            .get(&around)
            .map(|block| block.height())
            .ok_or(SetHeadFailure::Bookkeeping(ChainError::UnknownBlock(around)))?;

        // The deepest retained state checkpoint at or before the fork point. Blocks between it
        // and the fork point are on the shared prefix, so replaying them is deterministic.
        let prune_height = self.state_maker.find_prune_point(around_height.int());
        let mut replay_root = around;
        while self
            .blocks
            .get(&replay_root)
            .ok_or(SetHeadFailure::Bookkeeping(ChainError::UnknownBlock(replay_root)))?
            .height()
            .int()
            > prune_height
        {
            replay_root = self.blocks[&replay_root].parent_hash();
        }

        let path = self
            .construct_chain_path(&replay_root, &new_head)
            .map_err(SetHeadFailure::Bookkeeping)?;

        let blocks = &self.blocks;
        let path_blocks: Vec<&Block> = path
            .iter()
            .map(|hash| {
                blocks
                    .get(hash)
                    .ok_or(SetHeadFailure::Bookkeeping(ChainError::UnknownBlock(*hash)))
            })
            .collect::<Result<_, _>>()?;

        self.state_maker
            .reorganisation(prune_height, &path_blocks, is_test)
            .map_err(SetHeadFailure::Replay)
    }

    /// Lowest common ancestor of two known blocks, by lock-step direct-parent walks. The skip
    /// list is deliberately not used here; one step per iteration keeps the walk trivially
    /// correct.
    pub fn find_lca(&self, a: &CryptoHash, b: &CryptoHash) -> Result<CryptoHash, ChainError> {
        let mut visited_a: HashSet<CryptoHash> = HashSet::new();
        let mut visited_b: HashSet<CryptoHash> = HashSet::new();
        let mut cursor_a = *a;
        let mut cursor_b = *b;
        loop {
            visited_a.insert(cursor_a);
            visited_b.insert(cursor_b);
            if visited_b.contains(&cursor_a) {
                return Ok(cursor_a);
            }
            if visited_a.contains(&cursor_b) {
                return Ok(cursor_b);
            }

            let parent_a = self
                .blocks
                .get(&cursor_a)
                .ok_or(ChainError::UnknownBlock(cursor_a))?
                .parent_hash();
            let parent_b = self
                .blocks
                .get(&cursor_b)
                .ok_or(ChainError::UnknownBlock(cursor_b))?
                .parent_hash();

            if parent_a.is_zero() && parent_b.is_zero() {
                return Err(ChainError::NoCommonAncestor { a: *a, b: *b });
            }
            if !parent_a.is_zero() {
                cursor_a = parent_a;
            }
            if !parent_b.is_zero() {
                cursor_b = parent_b;
            }
        }
    }

    /// The blocks strictly after `start` up to and including `end`, in height order: the
    /// half-open range `(start, end]` along direct-parent links.
    pub fn construct_chain_path(
        &self,
        start: &CryptoHash,
        end: &CryptoHash,
    ) -> Result<Vec<CryptoHash>, ChainError> {
        let mut path = Vec::new();
        let mut cursor = *end;
        while cursor != *start {
            let block = self
                .blocks
                .get(&cursor)
                .ok_or(ChainError::UnknownBlock(cursor))?;
            path.push(cursor);
            let parent = block.parent_hash();
            if parent.is_zero() {
                return Err(ChainError::NoPath {
                    start: *start,
                    end: *end,
                });
            }
            cursor = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Blacklist `hash` and every known descendant, removing them from the active index.
    /// Children are processed before the block itself so a parent's removal never strands a
    /// lookup mid-walk.
    pub fn recursively_mark_invalid(&mut self, hash: &CryptoHash) {
        for child in self.db.get_children(hash) {
            if !self.invalid_block_hashes.contains(&child) {
                self.recursively_mark_invalid(&child);
            }
        }
        self.invalid_block_hashes.insert(*hash);
        if let Some(block) = self.blocks.remove(hash) {
            self.block_hashes_with_priority
                .remove(&(block.header.sigma_diff, *hash));
            logging::info_mark_invalid(hash);
        }
    }

    /// Dry-run a reorganisation to `candidate` without committing any state. `Ok` means the
    /// candidate's branch replays cleanly from the current chain.
    pub fn test_reorg_to(&mut self, candidate: CryptoHash) -> Result<(), ValidationError> {
        match self.try_reorg_to(candidate, true) {
            Ok(()) => Ok(()),
            Err(SetHeadFailure::Replay(failure)) => Err(failure.error),
            Err(SetHeadFailure::Bookkeeping(_)) => Err(ValidationError::AncestorMismatch),
        }
    }

    /// Build the next block candidate on top of the head: correct skip list, retargeted
    /// difficulty, accumulated sigma-diff, and the state root the given transactions produce.
    /// The caller owns the proof-of-work search.
    ///
    /// If the provided transactions don't apply cleanly they are dropped and the candidate is
    /// rebuilt empty.
    pub fn head_candidate(
        &mut self,
        super_txs: Vec<SuperTx>,
        now: u64,
    ) -> Result<Block, ChainError> {
        let head_hash = self.head.ok_or(ChainError::NotInitialized)?;
        let head = self
            .blocks
            .get(&head_hash)
            .ok_or(ChainError::UnknownBlock(head_hash))?;

        let height = head.height() + 1;
        let previous_blocks = self.db.get_ancestors(&head_hash);
        let target = expected_target(self, height, now, &previous_blocks)
            .map_err(|_| ChainError::UnknownBlock(head_hash))?;
        let sigma_diff = head
            .header
            .sigma_diff
            .accumulate(target_to_diff(target.to_u256()));

        let mut candidate = Block::new(
            Header {
                version: PROTOCOL_VERSION,
                nonce: 0,
                height,
                timestamp: now,
                target,
                sigma_diff,
                state_mr: CryptoHash::zero(),
                transaction_mr: merkle_leaves_to_root(
                    &super_txs.iter().map(|tx| tx.get_hash()).collect::<Vec<_>>(),
                ),
                uncles_mr: CryptoHash::zero(),
                previous_blocks,
            },
            Vec::new(),
            super_txs,
        );

        // Compute the post-execution state root in a future branch; nothing commits.
        let state_mr = {
            let mut future = self.state_maker.future_state();
            match future.apply_block_unchecked(&candidate) {
                Ok(root) => Some(root),
                Err(error) => {
                    logging::debug_reject_block(&candidate.get_hash(), &error);
                    None
                }
            }
        };
        let state_mr = match state_mr {
            Some(root) => root,
            None => {
                // Pending transactions didn't apply; mine an empty block instead.
                candidate.super_txs.clear();
                candidate.header.transaction_mr = merkle_leaves_to_root(&[]);
                let mut future = self.state_maker.future_state();
                future
                    .apply_block_unchecked(&candidate)
                    .map_err(|_| ChainError::NoValidCandidate)?
            }
        };

        Ok(Block::new(
            Header {
                state_mr,
                ..candidate.header
            },
            Vec::new(),
            candidate.super_txs,
        ))
    }

    fn restart_miner(&self) {
        self.miner_restart.store(true, Ordering::SeqCst);
    }
}
