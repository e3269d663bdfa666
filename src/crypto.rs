//! Content hashing and Merkle tree construction.
//!
//! A single hash function (SHA3-256, exposed as [`global_hash`]) is used everywhere a digest is
//! needed: block identity, transaction identity, state commitments, and proof-of-work. Digests are
//! ordered and compared as unsigned big-endian 256-bit integers, which is what makes
//! `hash < target` a meaningful proof-of-work test.
//!
//! The Merkle construction here is shared by the transaction, uncle, and state commitments, so it
//! must be bit-for-bit reproducible: same leaves in, same root out, on every implementation.

use primitive_types::U256;
use sha3::{Digest, Sha3_256};

use crate::types::basic::CryptoHash;

/// Hash `bytes` with the protocol hash function (SHA3-256).
pub fn global_hash(bytes: &[u8]) -> CryptoHash {
    let mut hasher = Sha3_256::new();
    hasher.update(bytes);
    CryptoHash::new(hasher.finalize().into())
}

/// Compute the root of a binary Merkle tree over `leaves`, bottom-up.
///
/// A level with an odd number of nodes is padded with the all-zero hash before pairing: padding,
/// not duplicate-last. The combine function is `global_hash(left ‖ right)`. An empty leaf list
/// yields the zero sentinel rather than an error.
pub fn merkle_leaves_to_root(leaves: &[CryptoHash]) -> CryptoHash {
    if leaves.is_empty() {
        return CryptoHash::zero();
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(CryptoHash::zero());
        }
        level = level
            .chunks(2)
            .map(|pair| combine(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// Roll a single leaf up an authentication path to reproduce the root.
///
/// `branch[i]` is the sibling at level `i`, and `sibling_on_right[i]` records which side it sits
/// on. Used for SPV-style inclusion proofs.
pub fn merkle_branch_to_root(
    leaf: CryptoHash,
    branch: &[CryptoHash],
    sibling_on_right: &[bool],
) -> CryptoHash {
    let mut acc = leaf;
    for (sibling, on_right) in branch.iter().zip(sibling_on_right.iter()) {
        acc = if *on_right {
            combine(&acc, sibling)
        } else {
            combine(sibling, &acc)
        };
    }
    acc
}

fn combine(left: &CryptoHash, right: &CryptoHash) -> CryptoHash {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&left.bytes());
    bytes[32..].copy_from_slice(&right.bytes());
    global_hash(&bytes)
}

/// The difficulty contributed by one block mined at `target`: `(2²⁵⁶ − 1) / target`.
pub fn target_to_diff(target: U256) -> U256 {
    if target.is_zero() {
        return U256::MAX;
    }
    U256::MAX / target
}
