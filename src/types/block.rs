//! Definitions for the block and header types and their validity rules.
//!
//! A [`Header`] carries everything consensus-critical: the proof-of-work fields, the cumulative
//! difficulty that drives fork choice, and the Merkle commitments binding the block to its
//! transactions, uncles, and post-execution state. A [`Block`] is a header plus the committed-to
//! content. Block identity is `global_hash` over the header's canonical borsh serialization.
//!
//! Validity is checked in two stages:
//! - [`assert_internal_consistency`](Block::assert_internal_consistency): self-contained checks
//!   that need no chain context. A block failing these could never be valid anywhere.
//! - [`assert_validity`](Block::assert_validity): checks against chain context (known ancestors,
//!   the retarget schedule, difficulty accounting). The state-root commitment is the one check
//!   deferred further still: it is asserted during replay, when the state actually exists.

use std::sync::OnceLock;

use borsh::{BorshDeserialize, BorshSerialize};
use primitive_types::{U256, U512};

use crate::chain::Chain;
use crate::crypto::{global_hash, merkle_leaves_to_root, target_to_diff};
use crate::database::Database;
use crate::errors::ValidationError;
use crate::types::basic::{BlockHeight, CryptoHash, SigmaDiff, Target};
use crate::types::transaction::SuperTx;

/// The pinned protocol version. Headers declaring anything else are rejected outright.
pub const PROTOCOL_VERSION: u16 = 1;

/// How far into the future a header's timestamp may lie.
pub const MAX_TIMESTAMP_DRIFT_SECS: u64 = 15 * 60;

/// Upper bound on the ancestor skip list. 64 entries reach height 2⁶³; anything longer is a
/// denial-of-service attempt, not a chain.
pub const MAX_PREVIOUS_BLOCKS: usize = 64;

/// The target is recomputed every this many blocks.
pub const RETARGET_PERIOD: u64 = 64;

/// Expected block spacing: 1440 blocks per day, one per minute.
pub const BLOCKS_PER_DAY: u64 = 1440;

/// Expected wall-clock seconds for one retarget period.
pub const EXPECTED_RETARGET_SECS: u64 = 60 * 60 * 24 * RETARGET_PERIOD / BLOCKS_PER_DAY;

/// The target a genesis block is mined against when none is declared elsewhere.
pub fn default_target() -> Target {
    let mut bytes = [0u8; 32];
    bytes[1] = 0xff;
    bytes[2] = 0xff;
    bytes[3] = 0xff;
    Target::new(bytes)
}

/// One block's consensus-critical metadata.
///
/// `previous_blocks` is a skip list of ancestor hashes at heights `h−1, h−2, h−4, h−8, …`:
/// entry zero is always the direct parent (zero for genesis), and the doubling intervals give
/// O(log n) ancestor and common-ancestor queries without walking the whole chain.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Header {
    pub version: u16,
    /// Nonce second, so that proof-of-work search rewrites bytes early in the preimage.
    pub nonce: u64,
    pub height: BlockHeight,
    pub timestamp: u64,
    pub target: Target,
    /// Cumulative difficulty from genesis through this block.
    pub sigma_diff: SigmaDiff,
    /// Merkle root of the world state after applying this block.
    pub state_mr: CryptoHash,
    /// Merkle root of this block's super-transactions.
    pub transaction_mr: CryptoHash,
    pub uncles_mr: CryptoHash,
    pub previous_blocks: Vec<CryptoHash>,
}

impl Header {
    pub fn serialize(&self) -> Vec<u8> {
        self.try_to_vec().expect("infallible serialization")
    }

    pub fn get_hash(&self) -> CryptoHash {
        global_hash(&self.serialize())
    }

    /// The direct parent's hash; zero for genesis.
    pub fn parent_hash(&self) -> CryptoHash {
        self.previous_blocks
            .first()
            .copied()
            .unwrap_or(CryptoHash::zero())
    }

    /// Whether this header's hash beats its declared target.
    pub fn valid_proof(&self) -> bool {
        self.get_hash().to_u256() < self.target.to_u256()
    }
}

/// A header plus the content it commits to, and (while it is the chain head) the block's claim
/// on the single state-execution context (held on its behalf by the [`Chain`]).
#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub struct Block {
    pub header: Header,
    pub uncles: Vec<Header>,
    pub super_txs: Vec<SuperTx>,
    #[borsh_skip]
    cached_hash: OnceLock<CryptoHash>,
}

impl Block {
    pub fn new(header: Header, uncles: Vec<Header>, super_txs: Vec<SuperTx>) -> Block {
        Block {
            header,
            uncles,
            super_txs,
            cached_hash: OnceLock::new(),
        }
    }

    /// The block's identity: the hash of its serialized header. Cached after the first call.
    pub fn get_hash(&self) -> CryptoHash {
        *self.cached_hash.get_or_init(|| self.header.get_hash())
    }

    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    pub fn parent_hash(&self) -> CryptoHash {
        self.header.parent_hash()
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.try_to_vec().expect("infallible serialization")
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block, ValidationError> {
        Block::try_from_slice(bytes).map_err(|_| ValidationError::UndecodableBlock)
    }

    /// Bump the nonce for another proof-of-work attempt.
    pub fn increment_nonce(&mut self) {
        self.header.nonce = self.header.nonce.wrapping_add(1);
        self.cached_hash = OnceLock::new();
    }

    pub fn valid_proof(&self) -> bool {
        self.get_hash().to_u256() < self.header.target.to_u256()
    }

    /// Strict fork-choice comparison: more cumulative work wins, and any block beats no block.
    /// Equal sigma-diff never displaces an incumbent.
    pub fn better_than(&self, other: Option<&Block>) -> bool {
        match other {
            None => true,
            Some(other) => self.header.sigma_diff > other.header.sigma_diff,
        }
    }

    /// Known ancestor hashes worth acquiring, with the heights they should sit at. Fed to the
    /// seeker so a single received block pulls in its whole skip list.
    pub fn related_blocks(&self) -> Vec<(u64, CryptoHash)> {
        let height = self.header.height.int();
        self.header
            .previous_blocks
            .iter()
            .enumerate()
            .filter(|(_, hash)| !hash.is_zero())
            .map(|(i, hash)| (height.saturating_sub(1u64 << i), *hash))
            .collect()
    }

    fn transaction_root(&self) -> CryptoHash {
        let leaves: Vec<CryptoHash> = self.super_txs.iter().map(|tx| tx.get_hash()).collect();
        merkle_leaves_to_root(&leaves)
    }

    fn uncles_root(&self) -> CryptoHash {
        let leaves: Vec<CryptoHash> = self.uncles.iter().map(|uncle| uncle.get_hash()).collect();
        merkle_leaves_to_root(&leaves)
    }

    /// Self-contained checks. A block failing these could never be valid, no matter the chain.
    pub fn assert_internal_consistency(&self, now: u64) -> Result<(), ValidationError> {
        if self.header.version != PROTOCOL_VERSION {
            return Err(ValidationError::WrongVersion {
                expected: PROTOCOL_VERSION,
                actual: self.header.version,
            });
        }
        let limit = now + MAX_TIMESTAMP_DRIFT_SECS;
        if self.header.timestamp > limit {
            return Err(ValidationError::TimestampTooFarAhead {
                timestamp: self.header.timestamp,
                limit,
            });
        }
        if self.header.previous_blocks.is_empty() {
            return Err(ValidationError::EmptySkipList);
        }
        if self.header.previous_blocks.len() > MAX_PREVIOUS_BLOCKS {
            return Err(ValidationError::SkipListTooLong {
                len: self.header.previous_blocks.len(),
            });
        }
        if !self.valid_proof() {
            return Err(ValidationError::InvalidProofOfWork);
        }
        if self.header.transaction_mr != self.transaction_root() {
            return Err(ValidationError::TransactionRootMismatch);
        }
        if !self.uncles.is_empty() {
            return Err(ValidationError::UnclesNotEmpty);
        }
        if self.header.uncles_mr != self.uncles_root() {
            return Err(ValidationError::UncleRootMismatch);
        }
        for super_tx in &self.super_txs {
            super_tx.assert_internal_consistency()?;
        }
        Ok(())
    }

    /// Context-dependent checks, against an initialized chain, or the genesis rules when the
    /// chain has no genesis yet.
    ///
    /// The `state_mr` commitment is deliberately not checked here: it is asserted when the block
    /// is replayed against actual state, and a mismatch there invalidates the block and its
    /// descendants.
    pub fn assert_validity<D: Database>(
        &self,
        chain: &Chain<D>,
        now: u64,
    ) -> Result<(), ValidationError> {
        self.assert_internal_consistency(now)?;

        if !chain.initialized() {
            if self.header.height != BlockHeight::new(0) {
                return Err(ValidationError::BadGenesis("height must be zero"));
            }
            if self.header.previous_blocks.len() != 1 || !self.parent_hash().is_zero() {
                return Err(ValidationError::BadGenesis("parent must be zeroed"));
            }
            if !self.header.state_mr.is_zero() {
                return Err(ValidationError::BadGenesis("state root must be zeroed"));
            }
            return Ok(());
        }

        let parent_hash = self.parent_hash();
        let parent = chain
            .get_block(&parent_hash)
            .ok_or(ValidationError::UnknownParent(parent_hash))?;

        if self.header.previous_blocks != chain.get_ancestors(&parent_hash) {
            return Err(ValidationError::AncestorMismatch);
        }

        let expected_height = parent.height() + 1;
        if self.header.height != expected_height {
            return Err(ValidationError::WrongHeight {
                expected: expected_height,
                actual: self.header.height,
            });
        }

        let expected = expected_target(
            chain,
            self.header.height,
            self.header.timestamp,
            &self.header.previous_blocks,
        )?;
        if self.header.target != expected {
            return Err(ValidationError::WrongTarget {
                expected,
                actual: self.header.target,
            });
        }

        let expected_sigma = parent
            .header
            .sigma_diff
            .accumulate(target_to_diff(self.header.target.to_u256()));
        if self.header.sigma_diff != expected_sigma {
            return Err(ValidationError::WrongSigmaDiff {
                expected: expected_sigma,
                actual: self.header.sigma_diff,
            });
        }

        Ok(())
    }
}

/// The target a block at `height` must declare, per the deterministic retarget schedule.
///
/// The target carries over from the parent except every [`RETARGET_PERIOD`] blocks, when it is
/// rescaled by the ratio of actual to expected elapsed time since the ancestor one period back,
/// found in O(1) through the skip list. The ratio is clamped to `[¼, 4]` to bound volatility per
/// adjustment.
pub fn expected_target<D: Database>(
    chain: &Chain<D>,
    height: BlockHeight,
    timestamp: u64,
    previous_blocks: &[CryptoHash],
) -> Result<Target, ValidationError> {
    let parent_hash = match previous_blocks.first() {
        Some(hash) if !hash.is_zero() => *hash,
        _ => return Ok(default_target()),
    };
    let parent = chain
        .get_block(&parent_hash)
        .ok_or(ValidationError::UnknownParent(parent_hash))?;

    if height.int() % RETARGET_PERIOD != 0 {
        return Ok(parent.header.target);
    }

    let ancestor_index = RETARGET_PERIOD.trailing_zeros() as usize;
    let ancestor_hash = previous_blocks
        .get(ancestor_index)
        .ok_or(ValidationError::AncestorMismatch)?;
    let ancestor = chain
        .get_block(ancestor_hash)
        .ok_or(ValidationError::UnknownParent(*ancestor_hash))?;

    let mut elapsed = timestamp.saturating_sub(ancestor.header.timestamp);
    elapsed = elapsed.clamp(EXPECTED_RETARGET_SECS / 4, EXPECTED_RETARGET_SECS * 4);

    let rescaled: U512 = parent.header.target.to_u256().full_mul(U256::from(elapsed))
        / U512::from(EXPECTED_RETARGET_SECS);
    let new_target = U256::try_from(rescaled).unwrap_or(U256::MAX);
    Ok(Target::from_u256(new_target))
}
