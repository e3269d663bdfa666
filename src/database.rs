//! The pluggable persistent store and its ancestor/children indices.
//!
//! The chain treats persistence abstractly: anything implementing [`Database`] works. Besides
//! plain keyed block storage, the store maintains two indices the fork-choice engine depends on:
//!
//! - The **ancestor index**: for each block, the skip-list back-references recorded at insertion
//!   time. [`get_ancestors`](Database::get_ancestors) reconstructs, for any stored block, the
//!   full list a *child* of that block must carry as `previous_blocks`: hashes at heights
//!   `h, h−1, h−3, h−7, …` below it, i.e. `h_child − 2^i` from the child's point of view.
//! - The **children index**: the reverse edge set, which lets invalidation cascade from a block
//!   to every known descendant.
//!
//! [`MemoryDb`] is the in-memory reference implementation.

use std::collections::HashMap;

use crate::types::basic::CryptoHash;
use crate::types::block::Block;

/// The persistence interface the chain requires.
pub trait Database: Send + 'static {
    fn exists(&self, key: &CryptoHash) -> bool;

    fn get(&self, key: &CryptoHash) -> Option<Vec<u8>>;

    fn set(&mut self, key: CryptoHash, value: Vec<u8>);

    /// Record `block`'s skip-list back-links and its edge in the children index. Called once,
    /// when the block enters the chain; the block's `previous_blocks` have been validated by
    /// then.
    fn set_ancestors(&mut self, block: &Block);

    /// Reconstruct the skip list a child of `block_hash` must carry: `[block_hash, a₁, a₂, …]`
    /// where `aᵢ` sits `2^i − 1` heights below `block_hash`. Returns just `[block_hash]` if the
    /// block is unknown or is genesis.
    fn get_ancestors(&self, block_hash: &CryptoHash) -> Vec<CryptoHash>;

    /// Every recorded block whose direct parent is `block_hash`.
    fn get_children(&self, block_hash: &CryptoHash) -> Vec<CryptoHash>;
}

/// An in-memory [`Database`].
pub struct MemoryDb {
    entries: HashMap<CryptoHash, Vec<u8>>,
    /// Per block, its own `previous_blocks` list as recorded at insertion.
    ancestors: HashMap<CryptoHash, Vec<CryptoHash>>,
    children: HashMap<CryptoHash, Vec<CryptoHash>>,
}

impl MemoryDb {
    pub fn new() -> MemoryDb {
        MemoryDb {
            entries: HashMap::new(),
            ancestors: HashMap::new(),
            children: HashMap::new(),
        }
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        MemoryDb::new()
    }
}

impl Database for MemoryDb {
    fn exists(&self, key: &CryptoHash) -> bool {
        self.entries.contains_key(key)
    }

    fn get(&self, key: &CryptoHash) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: CryptoHash, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    fn set_ancestors(&mut self, block: &Block) {
        let hash = block.get_hash();
        self.ancestors
            .insert(hash, block.header.previous_blocks.clone());
        let parent = block.parent_hash();
        if !parent.is_zero() {
            let children = self.children.entry(parent).or_default();
            if !children.contains(&hash) {
                children.push(hash);
            }
        }
    }

    fn get_ancestors(&self, block_hash: &CryptoHash) -> Vec<CryptoHash> {
        // The ancestor 2^(i+1) − 1 below the start is entry i+1 ... entry i of the previous
        // ancestor's own list: aᵢ₊₁ = prevs(aᵢ)[i], because aᵢ sits 2^i − 1 below the start and
        // its entry i sits another 2^i below that.
        let mut ancestors = vec![*block_hash];
        let mut cursor = *block_hash;
        let mut i = 0usize;
        loop {
            let prevs = match self.ancestors.get(&cursor) {
                Some(prevs) => prevs,
                None => break,
            };
            match prevs.get(i) {
                Some(hash) if !hash.is_zero() => {
                    cursor = *hash;
                    ancestors.push(cursor);
                    i += 1;
                }
                _ => break,
            }
        }
        ancestors
    }

    fn get_children(&self, block_hash: &CryptoHash) -> Vec<CryptoHash> {
        self.children.get(block_hash).cloned().unwrap_or_default()
    }
}
