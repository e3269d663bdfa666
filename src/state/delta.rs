//! The layered, checkpointable key-value overlay that backs every sub-ledger.
//!
//! A [`DeltaChain`] is a persistent linked structure of copy-on-write overlay nodes
//! ("state deltas"), one retained node per checkpointed block height. A lookup walks from the
//! newest delta towards the root until it finds a local entry, a tombstone, or runs out of
//! ancestors, in which case the key reads as the empty (zero) value. State is conceptually
//! infinite and sparse, so an absent key is a value, not an error.
//!
//! Nodes are arena-allocated and linked by handle, not by owning pointers: the
//! `parent`/`child` relationship is bidirectional and splicing a node out on merge rewires both
//! sides.
//!
//! ## Checkpoint retention
//!
//! Keeping one delta per block forever would make deep reorganisations cheap but memory
//! unbounded. Instead, [`gen_checkpoint_heights`] defines a binary-decay schedule: recent heights
//! are kept densely, older heights at exponentially sparser intervals, the root always. Deltas at
//! heights that fall off the schedule are merged into their child ([`absorb`](DeltaChain): child
//! entries win) and spliced out. A reorganisation spanning `n` blocks therefore rewinds to a
//! retained checkpoint at most `2n` blocks deep, a bound the test suite checks.
//!
//! ## Branches
//!
//! A chain supports one side branch at a time, rooted at a retained delta and tagged
//! [`Trial`](BranchTag::Trial) or [`Future`](BranchTag::Future). Branch writes land in branch
//! nodes and are invisible to the main chain until [`commit_branch`](DeltaChain::commit_branch)
//! folds them in; [`discard_branch`](DeltaChain::discard_branch) drops them wholesale. The main
//! chain records at most one hardened child per delta; branch nodes are tracked on the side and
//! never become that child until commit.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::crypto::{global_hash, merkle_leaves_to_root};
use crate::types::basic::CryptoHash;

/// Handle to a delta node inside a [`DeltaChain`]'s arena.
pub type DeltaId = usize;

/// What a side branch is for. `Trial` branches test a candidate chain segment before committing;
/// `Future` branches model the next block in progress and are rebuilt when the head changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchTag {
    Trial,
    Future,
}

struct DeltaNode {
    height: u64,
    store: HashMap<Vec<u8>, Vec<u8>>,
    /// Tombstones shadowing entries in ancestor deltas.
    deleted: HashSet<Vec<u8>>,
    parent: Option<DeltaId>,
    /// The single hardened successor; `None` at the tip. Branch nodes link to each other here
    /// while stacking, but never become a main-chain node's child until the branch commits.
    child: Option<DeltaId>,
    cached_hash: Option<CryptoHash>,
}

impl DeltaNode {
    fn new(height: u64, parent: Option<DeltaId>) -> DeltaNode {
        DeltaNode {
            height,
            store: HashMap::new(),
            deleted: HashSet::new(),
            parent,
            child: None,
            cached_hash: None,
        }
    }
}

struct Branch {
    tag: BranchTag,
    /// The retained main-chain delta the branch grows from. Never mutated while the branch lives.
    base: DeltaId,
    /// Writable overlay at the base's height, so a branch can be written without checkpointing.
    scratch: DeltaId,
    tip: DeltaId,
}

/// A chain of state deltas mirroring the block chain, plus at most one in-flight side branch.
pub struct DeltaChain {
    nodes: Vec<Option<DeltaNode>>,
    free: Vec<DeltaId>,
    root: DeltaId,
    tip: DeltaId,
    branch: Option<Branch>,
}

impl DeltaChain {
    /// A fresh chain containing only the root delta at height zero.
    pub fn new() -> DeltaChain {
        let root = DeltaNode::new(0, None);
        DeltaChain {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: 0,
            tip: 0,
            branch: None,
        }
    }

    fn node(&self, id: DeltaId) -> &DeltaNode {
        self.nodes[id].as_ref().expect("dangling delta handle")
    }

    fn node_mut(&mut self, id: DeltaId) -> &mut DeltaNode {
        self.nodes[id].as_mut().expect("dangling delta handle")
    }

    fn alloc(&mut self, node: DeltaNode) -> DeltaId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: DeltaId) {
        self.nodes[id] = None;
        self.free.push(id);
    }

    /// The delta that reads and writes currently go to: the branch tip while a branch is active,
    /// the main tip otherwise.
    fn active_tip(&self) -> DeltaId {
        match &self.branch {
            Some(branch) => branch.tip,
            None => self.tip,
        }
    }

    /// Height of the delta writes currently go to.
    pub fn height(&self) -> u64 {
        self.node(self.active_tip()).height
    }

    /// Which branch, if any, is currently active.
    pub fn active_branch(&self) -> Option<BranchTag> {
        self.branch.as_ref().map(|branch| branch.tag)
    }

    /// Look `key` up, walking the ancestor chain. A tombstoned or absent key reads as the empty
    /// value; this never fails.
    pub fn get(&self, key: &[u8]) -> Vec<u8> {
        let mut cursor = Some(self.active_tip());
        while let Some(id) = cursor {
            let node = self.node(id);
            if let Some(value) = node.store.get(key) {
                return value.clone();
            }
            if node.deleted.contains(key) {
                return Vec::new();
            }
            cursor = node.parent;
        }
        Vec::new()
    }

    /// Whether `key` currently reads as a present (non-empty) entry.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        !self.get(key).is_empty()
    }

    /// Write `key` locally, clearing any local tombstone. Ancestors are unaffected.
    pub fn set(&mut self, key: &[u8], value: Vec<u8>) {
        let tip = self.active_tip();
        let node = self.node_mut(tip);
        node.deleted.remove(key);
        node.store.insert(key.to_vec(), value);
        node.cached_hash = None;
    }

    /// Tombstone `key` locally: any ancestor value becomes invisible.
    pub fn delete(&mut self, key: &[u8]) {
        let tip = self.active_tip();
        let node = self.node_mut(tip);
        node.store.remove(key);
        node.deleted.insert(key.to_vec());
        node.cached_hash = None;
    }

    /// Every key with a visible entry: local keys plus ancestors' keys, minus tombstones.
    ///
    /// O(depth × size); used for root-hash computation and introspection, never in
    /// per-transaction hot paths.
    pub fn all_keys(&self) -> BTreeSet<Vec<u8>> {
        let mut keys = BTreeSet::new();
        let mut shadowed: HashSet<&[u8]> = HashSet::new();
        let mut cursor = Some(self.active_tip());
        while let Some(id) = cursor {
            let node = self.node(id);
            for key in node.store.keys() {
                if !shadowed.contains(key.as_slice()) {
                    keys.insert(key.clone());
                }
            }
            for key in node.store.keys().chain(node.deleted.iter()) {
                shadowed.insert(key.as_slice());
            }
            cursor = node.parent;
        }
        keys
    }

    /// Merkle root over the flattened, key-sorted `(hash(key), hash(value))` pairs of the
    /// effective state. Cached on the active delta until a local write invalidates it.
    pub fn root_hash(&mut self) -> CryptoHash {
        let tip = self.active_tip();
        if let Some(cached) = self.node(tip).cached_hash {
            return cached;
        }
        let mut leaves = Vec::new();
        for key in self.all_keys() {
            let value = self.get(&key);
            leaves.push(global_hash(&key));
            leaves.push(global_hash(&value));
        }
        let root = merkle_leaves_to_root(&leaves);
        self.node_mut(tip).cached_hash = Some(root);
        root
    }

    /// Stack a new delta on the active tip, at the next height. With `hard`, the retention
    /// schedule is applied to the main chain first, merging deltas that fall off it.
    ///
    /// Inside a branch, checkpoints simply stack; hardening happens when the branch commits.
    pub fn checkpoint(&mut self, hard: bool) {
        if self.branch.is_none() && hard {
            self.harden();
        }
        let tip = self.active_tip();
        let next_height = self.node(tip).height + 1;
        let new = self.alloc(DeltaNode::new(next_height, Some(tip)));
        self.node_mut(tip).child = Some(new);
        match &mut self.branch {
            Some(branch) => {
                branch.tip = new;
            }
            None => {
                self.tip = new;
            }
        }
    }

    /// Apply the retention schedule for the upcoming height: merge every main-chain delta whose
    /// height is not in `gen_checkpoint_heights(tip_height + 1)` into its child.
    pub fn harden(&mut self) {
        debug_assert!(self.branch.is_none(), "cannot harden during a branch");
        let keep: HashSet<u64> = gen_checkpoint_heights(self.node(self.tip).height + 1)
            .into_iter()
            .collect();
        let mut chain = Vec::new();
        let mut cursor = Some(self.tip);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.node(id).parent;
        }
        for id in chain {
            if !keep.contains(&self.node(id).height) {
                self.merge_with_child(id);
            }
        }
    }

    /// Absorb this delta into its child (child entries win) and splice it out of the chain.
    fn merge_with_child(&mut self, id: DeltaId) {
        let child = self.node(id).child.expect("tip deltas are always retained");
        let parent = self.node(id).parent.expect("the root delta is always retained");

        let node = self.nodes[id].take().expect("dangling delta handle");
        {
            let child_node = self.node_mut(child);
            for (key, value) in node.store {
                if !child_node.store.contains_key(&key) && !child_node.deleted.contains(&key) {
                    child_node.store.insert(key, value);
                }
            }
            for key in node.deleted {
                if !child_node.store.contains_key(&key) && !child_node.deleted.contains(&key) {
                    child_node.deleted.insert(key);
                }
            }
            // The child's effective state is unchanged by absorbing its own ancestor, so its
            // cached root stays valid.
            child_node.parent = Some(parent);
        }
        self.node_mut(parent).child = Some(child);
        self.free.push(id);
    }

    /// The greatest retained height at or below `max_height`: how far back a reorganisation can
    /// rewind without recomputing from genesis.
    pub fn find_prune_point(&self, max_height: u64) -> u64 {
        let mut cursor = self.tip;
        while self.node(cursor).height > max_height {
            cursor = self
                .node(cursor)
                .parent
                .expect("the root delta is at height zero");
        }
        self.node(cursor).height
    }

    /// The deepest retained height at or below `height`, walking child links from the root.
    pub fn child_at_or_before(&self, height: u64) -> u64 {
        let mut cursor = self.root;
        while let Some(child) = self.node(cursor).child {
            if self.node(child).height > height {
                break;
            }
            cursor = child;
        }
        self.node(cursor).height
    }

    /// Rewind the main chain: discard every delta above the retained checkpoint at or below
    /// `height`, making that checkpoint the tip again.
    pub fn prune_to_or_beyond(&mut self, height: u64) {
        debug_assert!(self.branch.is_none(), "cannot prune during a branch");
        while self.node(self.tip).height > height {
            let parent = self
                .node(self.tip)
                .parent
                .expect("the root delta is at height zero");
            let old_tip = self.tip;
            self.release(old_tip);
            self.tip = parent;
        }
        self.node_mut(self.tip).child = None;
    }

    /// Retained heights from tip to root, for introspection and tests.
    pub fn retained_heights(&self) -> Vec<u64> {
        let mut heights = Vec::new();
        let mut cursor = Some(self.tip);
        while let Some(id) = cursor {
            heights.push(self.node(id).height);
            cursor = self.node(id).parent;
        }
        heights
    }

    /// Open a side branch rooted at the retained delta at or below `at_height`. Reads and writes
    /// are redirected to the branch until it is committed or discarded.
    ///
    /// Only one branch may be active at a time.
    pub fn begin_branch(&mut self, tag: BranchTag, at_height: u64) {
        assert!(self.branch.is_none(), "a branch is already active");
        let mut base = self.tip;
        while self.node(base).height > at_height {
            base = self
                .node(base)
                .parent
                .expect("the root delta is at height zero");
        }
        let base_height = self.node(base).height;
        let scratch = self.alloc(DeltaNode::new(base_height, Some(base)));
        self.branch = Some(Branch {
            tag,
            base,
            scratch,
            tip: scratch,
        });
    }

    /// Make the branch permanent: deltas on the losing side of the fork are dropped, branch
    /// writes are folded in, and the retention schedule is re-applied.
    pub fn commit_branch(&mut self) {
        let branch = self.branch.take().expect("no branch to commit");

        // Drop the main-chain deltas above the branch base (the losing fork's states).
        while self.tip != branch.base {
            let parent = self
                .node(self.tip)
                .parent
                .expect("branch base is an ancestor of the tip");
            let old_tip = self.tip;
            self.release(old_tip);
            self.tip = parent;
        }

        // Fold the scratch overlay into the base. Scratch entries are newer, so they win.
        let scratch = self.nodes[branch.scratch]
            .take()
            .expect("dangling delta handle");
        self.free.push(branch.scratch);
        {
            let base_node = self.node_mut(branch.base);
            base_node.child = None;
            for (key, value) in scratch.store {
                base_node.deleted.remove(&key);
                base_node.store.insert(key, value);
            }
            for key in scratch.deleted {
                base_node.store.remove(&key);
                base_node.deleted.insert(key);
            }
            base_node.cached_hash = None;
        }

        // Splice the checkpointed branch nodes onto the base.
        match scratch.child {
            Some(first) => {
                self.node_mut(first).parent = Some(branch.base);
                self.node_mut(branch.base).child = Some(first);
                self.tip = branch.tip;
            }
            None => {
                self.tip = branch.base;
            }
        }

        // Branch nodes recorded each other as children while stacking; they are hardened now.
        self.harden();
    }

    /// Abandon the branch: every branch delta is dropped, the main chain is untouched.
    pub fn discard_branch(&mut self) {
        let branch = self.branch.take().expect("no branch to discard");
        let mut cursor = branch.tip;
        loop {
            let parent = self.node(cursor).parent;
            let at_scratch = cursor == branch.scratch;
            self.release(cursor);
            if at_scratch {
                break;
            }
            cursor = parent.expect("branch nodes chain back to the scratch overlay");
        }
    }

    /// Clear all writes made to the active tip since it was created. Used to revert a
    /// half-applied block: the tip is always freshly checkpointed before a block's transactions
    /// run.
    pub fn reset_tip(&mut self) {
        let tip = self.active_tip();
        let node = self.node_mut(tip);
        node.store.clear();
        node.deleted.clear();
        node.cached_hash = None;
    }
}

impl Default for DeltaChain {
    fn default() -> Self {
        DeltaChain::new()
    }
}

/// The heights whose deltas must be retained when the chain is about to reach `height`.
///
/// Binary decay: `height` (and `height − 1` when `height` is odd) are always kept, then the step
/// doubles every time the walk crosses a boundary that is not a multiple of the next power of
/// two. The root (height zero) is always kept.
pub fn gen_checkpoint_heights(mut height: u64) -> Vec<u64> {
    let mut heights = Vec::new();
    let mut i = 0u32;
    if height % 2 == 1 {
        heights.push(height);
        height -= 1;
    }
    loop {
        heights.push(height);
        let step = 1u64 << i;
        if height % (1u64 << (i + 1)) != 0 {
            if height < step {
                break;
            }
            height -= step;
            i += 1;
        } else {
            if height < step {
                break;
            }
            height -= step;
        }
    }
    heights
}
