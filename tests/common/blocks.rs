//! A factory for fully valid test chains mined against an easy target.

use gracht_rs::crypto::target_to_diff;
use gracht_rs::state::dapp::TxPrism;
use gracht_rs::state::state_maker::StateMaker;
use gracht_rs::types::basic::{BlockHeight, CryptoHash, SigmaDiff, Target};
use gracht_rs::types::block::{Block, Header, PROTOCOL_VERSION, RETARGET_PERIOD};

/// A fixed, comfortably past timestamp so tests never trip the future-drift rule.
pub(crate) const BASE_TIMESTAMP: u64 = 1_700_000_000;

/// Half the hash space: mining succeeds within a couple of attempts.
pub(crate) fn easy_target() -> Target {
    let mut bytes = [0xffu8; 32];
    bytes[0] = 0x7f;
    Target::new(bytes)
}

/// The sub-ledger registry every test node runs: just the built-in transfer ledger.
pub(crate) fn tx_prism_state_maker() -> StateMaker {
    let mut state_maker = StateMaker::new();
    state_maker.register_dapp(Box::new(TxPrism));
    state_maker
}

/// The super-state root every empty-transaction block commits to, given the
/// [`tx_prism_state_maker`] registry.
pub(crate) fn empty_state_root() -> CryptoHash {
    tx_prism_state_maker().super_state_hash()
}

/// Search nonces until the proof of work validates.
pub(crate) fn mine(block: &mut Block) {
    while !block.valid_proof() {
        block.increment_nonce();
    }
}

/// The skip list a block extending `lineage` must carry: ancestors at heights
/// `h−1, h−2, h−4, …` where `h = lineage.len()`.
pub(crate) fn skip_list(lineage: &[Block]) -> Vec<CryptoHash> {
    let height = lineage.len() as u64;
    let mut hashes = Vec::new();
    let mut i = 0u32;
    while height >= (1u64 << i) {
        let ancestor_height = height - (1u64 << i);
        hashes.push(lineage[ancestor_height as usize].get_hash());
        i += 1;
    }
    hashes
}

/// A mined genesis block satisfying the genesis-only rules (zero parent, zero state root).
pub(crate) fn make_genesis() -> Block {
    let mut block = Block::new(
        Header {
            version: PROTOCOL_VERSION,
            nonce: 0,
            height: BlockHeight::new(0),
            timestamp: BASE_TIMESTAMP,
            target: easy_target(),
            sigma_diff: SigmaDiff::zero(),
            state_mr: CryptoHash::zero(),
            transaction_mr: CryptoHash::zero(),
            uncles_mr: CryptoHash::zero(),
            previous_blocks: vec![CryptoHash::zero()],
        },
        Vec::new(),
        Vec::new(),
    );
    mine(&mut block);
    block
}

/// A mined, fully valid, empty-transaction child extending `lineage`.
pub(crate) fn make_child(lineage: &[Block]) -> Block {
    let parent = lineage.last().expect("lineage starts at genesis");
    let height = parent.height() + 1;
    assert!(
        height.int() % RETARGET_PERIOD != 0,
        "test chains stay inside one retarget window"
    );
    let target = parent.header.target;
    let sigma_diff = parent
        .header
        .sigma_diff
        .accumulate(target_to_diff(target.to_u256()));

    let mut block = Block::new(
        Header {
            version: PROTOCOL_VERSION,
            nonce: 0,
            height,
            timestamp: BASE_TIMESTAMP + height.int(),
            target,
            sigma_diff,
            state_mr: empty_state_root(),
            transaction_mr: CryptoHash::zero(),
            uncles_mr: CryptoHash::zero(),
            previous_blocks: skip_list(lineage),
        },
        Vec::new(),
        Vec::new(),
    );
    mine(&mut block);
    block
}

/// Genesis plus `children` valid descendants: `result[i]` sits at height `i`.
pub(crate) fn make_chain(children: usize) -> Vec<Block> {
    let mut lineage = vec![make_genesis()];
    for _ in 0..children {
        let child = make_child(&lineage);
        lineage.push(child);
    }
    lineage
}

/// A mined child with a hand-picked sigma-diff (and optionally a corrupt state root), for
/// driving fork choice directly through `Chain::add_block`, which trusts header fields and
/// exposes lies only at replay time.
pub(crate) fn fabricated_child(lineage: &[Block], sigma: u64, good_state: bool) -> Block {
    let parent = lineage.last().expect("lineage starts at genesis");
    let height = parent.height() + 1;
    let state_mr = if good_state {
        empty_state_root()
    } else {
        gracht_rs::crypto::global_hash(b"not the state root")
    };
    let mut block = Block::new(
        Header {
            version: PROTOCOL_VERSION,
            nonce: 0,
            height,
            timestamp: BASE_TIMESTAMP + height.int(),
            target: easy_target(),
            sigma_diff: SigmaDiff::from_u256(sigma.into()),
            state_mr,
            transaction_mr: CryptoHash::zero(),
            uncles_mr: CryptoHash::zero(),
            previous_blocks: skip_list(lineage),
        },
        Vec::new(),
        Vec::new(),
    );
    mine(&mut block);
    block
}
