//! Error types shared across the crate.
//!
//! The two families mirror the two ways things go wrong in a proof-of-work node:
//!
//! 1. [`ValidationError`]: a block, header, or transaction failed a checkable rule. Always
//!    recoverable at the point of receipt: the offending unit is discarded or blacklisted and
//!    processing of everything else continues.
//! 2. [`ChainError`]: an invariant of the [`Chain`](crate::chain::Chain)'s internal bookkeeping was
//!    violated (no common ancestor, no path, genesis re-declared). These indicate either a
//!    disjoint/malicious peer set or an internal bug. They surface to the caller; the builder loop
//!    catches and logs them without taking the process down.

use std::fmt::{self, Display, Formatter};

use crate::types::basic::{BlockHeight, CryptoHash, SigmaDiff, Target};

/// A block, header, or transaction failed a checkable rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// The header's version field is not the pinned protocol version.
    WrongVersion { expected: u16, actual: u16 },

    /// The header's timestamp is too far ahead of local time.
    TimestampTooFarAhead { timestamp: u64, limit: u64 },

    /// The header's hash does not beat its declared target.
    InvalidProofOfWork,

    /// The ancestor skip list is longer than any honest chain could produce.
    SkipListTooLong { len: usize },

    /// The ancestor skip list is empty. Even genesis carries one (zero) entry.
    EmptySkipList,

    /// The declared transaction Merkle root does not match the block's transactions.
    TransactionRootMismatch,

    /// The declared uncles Merkle root does not match the block's uncle headers.
    UncleRootMismatch,

    /// The block carries uncle headers. Uncles are committed to but must be empty.
    UnclesNotEmpty,

    /// The block's direct parent is not a known valid block.
    UnknownParent(CryptoHash),

    /// The ancestor skip list does not match the ancestors recorded for the parent.
    AncestorMismatch,

    /// The block's height is not its parent's height plus one.
    WrongHeight {
        expected: BlockHeight,
        actual: BlockHeight,
    },

    /// The header's target does not match the deterministic retarget schedule.
    WrongTarget { expected: Target, actual: Target },

    /// The header's cumulative difficulty does not extend its parent's.
    WrongSigmaDiff {
        expected: SigmaDiff,
        actual: SigmaDiff,
    },

    /// The state root committed by the header does not match the post-execution state.
    StateRootMismatch {
        expected: CryptoHash,
        actual: CryptoHash,
    },

    /// A super-transaction's authorizing signature failed to verify.
    BadSignature,

    /// A transaction addresses a sub-ledger that is not registered.
    UnknownDapp(Vec<u8>),

    /// A transfer debits more than the sender's balance.
    InsufficientBalance,

    /// A transaction is structurally unusable (e.g. missing recipient).
    MalformedTransaction(&'static str),

    /// Wire bytes could not be decoded into a block.
    UndecodableBlock,

    /// A genesis block broke one of the genesis-only rules.
    BadGenesis(&'static str),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::WrongVersion { expected, actual } => {
                write!(f, "version must be {}, got {}", expected, actual)
            }
            ValidationError::TimestampTooFarAhead { timestamp, limit } => {
                write!(f, "timestamp {} is past the drift limit {}", timestamp, limit)
            }
            ValidationError::InvalidProofOfWork => write!(f, "proof of work does not meet target"),
            ValidationError::SkipListTooLong { len } => {
                write!(f, "ancestor skip list of length {} exceeds the bound", len)
            }
            ValidationError::EmptySkipList => write!(f, "ancestor skip list is empty"),
            ValidationError::TransactionRootMismatch => {
                write!(f, "transaction merkle root does not match block contents")
            }
            ValidationError::UncleRootMismatch => {
                write!(f, "uncles merkle root does not match block contents")
            }
            ValidationError::UnclesNotEmpty => write!(f, "uncle headers must be empty"),
            ValidationError::UnknownParent(hash) => write!(f, "unknown parent {}", hash),
            ValidationError::AncestorMismatch => {
                write!(f, "skip list does not match recorded ancestors")
            }
            ValidationError::WrongHeight { expected, actual } => {
                write!(f, "height must be {}, got {}", expected, actual)
            }
            ValidationError::WrongTarget { .. } => {
                write!(f, "target does not match the retarget schedule")
            }
            ValidationError::WrongSigmaDiff { .. } => {
                write!(f, "sigma-diff does not extend the parent's")
            }
            ValidationError::StateRootMismatch { expected, actual } => {
                write!(f, "state root mismatch: header {}, computed {}", expected, actual)
            }
            ValidationError::BadSignature => write!(f, "super-transaction signature is invalid"),
            ValidationError::UnknownDapp(name) => {
                write!(f, "no dapp registered under name {:?}", name)
            }
            ValidationError::InsufficientBalance => write!(f, "insufficient balance"),
            ValidationError::MalformedTransaction(why) => {
                write!(f, "malformed transaction: {}", why)
            }
            ValidationError::UndecodableBlock => write!(f, "undecodable block bytes"),
            ValidationError::BadGenesis(why) => write!(f, "bad genesis block: {}", why),
        }
    }
}

/// An invariant of the chain's internal bookkeeping was violated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainError {
    /// A genesis block was declared on a chain that already has one.
    GenesisAlreadyKnown(CryptoHash),

    /// The declared genesis block failed validation.
    InvalidGenesis(ValidationError),

    /// The chain has no genesis block yet.
    NotInitialized,

    /// A hash was expected to be in the active block index but is not.
    UnknownBlock(CryptoHash),

    /// Two chains reached the zero parent without converging. Should not occur within a single
    /// well-formed network, but must be defended against.
    NoCommonAncestor { a: CryptoHash, b: CryptoHash },

    /// Walking `end`'s parents reached the zero parent without hitting `start`.
    NoPath { start: CryptoHash, end: CryptoHash },

    /// Every fork candidate failed validation; there is no valid chain at all.
    NoValidCandidate,
}

impl Display for ChainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::GenesisAlreadyKnown(hash) => {
                write!(f, "genesis block already known: {}", hash)
            }
            ChainError::InvalidGenesis(error) => write!(f, "invalid genesis block: {}", error),
            ChainError::NotInitialized => write!(f, "chain has no genesis block"),
            ChainError::UnknownBlock(hash) => write!(f, "unknown block {}", hash),
            ChainError::NoCommonAncestor { a, b } => {
                write!(f, "no common ancestor between {} and {}", a, b)
            }
            ChainError::NoPath { start, end } => {
                write!(f, "no parent path from {} back to {}", end, start)
            }
            ChainError::NoValidCandidate => write!(f, "no valid chain candidate remains"),
        }
    }
}

/// Why a reorganisation was abandoned: the block whose replay failed, and the rule it broke.
///
/// The chain reacts by recursively invalidating `failed_block` and its descendants, then
/// re-selecting the best remaining chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReorgFailure {
    pub failed_block: CryptoHash,
    pub error: ValidationError,
}

impl Display for ReorgFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "replay of block {} failed: {}", self.failed_block, self.error)
    }
}
