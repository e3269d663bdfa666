//! "Inert" newtypes shared across the crate.
//!
//! These follow the newtype pattern: they are sent around, stored, and inspected, but have no
//! active behaviour of their own. Consensus-critical values that are numerically 256 bits wide
//! ([`CryptoHash`], [`Target`], [`SigmaDiff`]) are stored as big-endian 32-byte arrays so that
//! their borsh layout is canonical and byte-wise ordering coincides with numeric ordering.

use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Add, AddAssign, Sub};

use borsh::{BorshDeserialize, BorshSerialize};
use primitive_types::U256;

/// Height of a block in the chain. Genesis is at height zero.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(u64);

impl BlockHeight {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0 + rhs)
    }
}

impl AddAssign<u64> for BlockHeight {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u64;
    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0 - rhs.0
    }
}

/// A 32-byte content digest, compared as an unsigned big-endian 256-bit integer.
///
/// Produced by [`global_hash`](crate::crypto::global_hash) and used for block identity,
/// transaction identity, and state commitments. The all-zero value is a sentinel: the parent of
/// genesis, and the root of an empty Merkle tree.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The digest viewed as an unsigned big-endian integer, for proof-of-work comparisons.
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A proof-of-work threshold: a header is valid work iff `hash(header) < target`, numerically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Target([u8; 32]);

impl Target {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    pub fn from_u256(value: U256) -> Self {
        let mut bytes = [0u8; 32];
        value.to_big_endian(&mut bytes);
        Self(bytes)
    }
}

impl Debug for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Target({:x})", self.to_u256())
    }
}

/// Cumulative proof-of-work difficulty from genesis to a block; the fork-choice metric.
///
/// Monotonically increasing along any valid chain, since every block contributes a positive
/// difficulty.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct SigmaDiff([u8; 32]);

impl SigmaDiff {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    pub fn from_u256(value: U256) -> Self {
        let mut bytes = [0u8; 32];
        value.to_big_endian(&mut bytes);
        Self(bytes)
    }

    /// The cumulative difficulty of a child block mined at difficulty `diff`.
    pub fn accumulate(&self, diff: U256) -> SigmaDiff {
        SigmaDiff::from_u256(self.to_u256().saturating_add(diff))
    }
}

impl Debug for SigmaDiff {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SigmaDiff({})", self.to_u256())
    }
}

/// A batch of block hashes, as carried by a `request_blocks` message.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct HashList(Vec<CryptoHash>);

impl HashList {
    pub fn new(hashes: Vec<CryptoHash>) -> Self {
        Self(hashes)
    }

    pub fn vec(&self) -> &Vec<CryptoHash> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, hash: CryptoHash) {
        self.0.push(hash)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CryptoHash> {
        self.0.iter()
    }
}

/// A batch of serialized payloads, as carried by a `blocks` message.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct BytesList(Vec<Vec<u8>>);

impl BytesList {
    pub fn new(items: Vec<Vec<u8>>) -> Self {
        Self(items)
    }

    pub fn vec(&self) -> &Vec<Vec<u8>> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, bytes: Vec<u8>) {
        self.0.push(bytes)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec<u8>> {
        self.0.iter()
    }
}
