//! Fork-choice scenarios driven directly through the [`Chain`]: genesis, linear growth,
//! competing forks, deferred invalidation cascades, and candidate production.

mod common;

use common::blocks::{
    fabricated_child, make_chain, make_child, make_genesis, mine, tx_prism_state_maker,
    BASE_TIMESTAMP,
};
use gracht_rs::chain::Chain;
use gracht_rs::database::MemoryDb;
use gracht_rs::errors::{ChainError, ValidationError};
use gracht_rs::types::basic::BlockHeight;

fn new_chain() -> Chain<MemoryDb> {
    Chain::new(MemoryDb::new(), tx_prism_state_maker())
}

fn now() -> u64 {
    BASE_TIMESTAMP + 1_000
}

#[test]
fn genesis_scenario() {
    let mut chain = new_chain();
    assert!(!chain.initialized());

    let genesis = make_genesis();
    let genesis_hash = genesis.get_hash();
    chain.set_genesis(genesis, now()).unwrap();

    assert!(chain.initialized());
    assert_eq!(chain.head_hash(), Some(genesis_hash));
    assert_eq!(chain.get_height(), BlockHeight::new(0));

    // Re-declaring genesis is a chain error.
    assert_eq!(
        chain.set_genesis(make_genesis(), now()),
        Err(ChainError::GenesisAlreadyKnown(genesis_hash))
    );
}

#[test]
fn genesis_must_obey_genesis_rules() {
    let mut chain = new_chain();
    let lineage = make_chain(1);
    // A height-one block is not a genesis block.
    let result = chain.set_genesis(lineage[1].clone(), now());
    assert!(matches!(
        result,
        Err(ChainError::InvalidGenesis(ValidationError::BadGenesis(_)))
    ));
}

#[test]
fn linear_chain_extends_head() {
    let mut chain = new_chain();
    let lineage = make_chain(3);
    chain.set_genesis(lineage[0].clone(), now()).unwrap();

    for block in &lineage[1..] {
        // Every factory block passes full contextual validation.
        block.assert_validity(&chain, now()).unwrap();
        assert!(chain.add_block(block.clone()).unwrap());
    }

    assert_eq!(chain.head_hash(), Some(lineage[3].get_hash()));
    assert_eq!(chain.get_height(), BlockHeight::new(3));
}

#[test]
fn add_block_is_idempotent() {
    let mut chain = new_chain();
    let lineage = make_chain(1);
    chain.set_genesis(lineage[0].clone(), now()).unwrap();

    assert!(chain.add_block(lineage[1].clone()).unwrap());
    // The second add is a no-op.
    assert!(!chain.add_block(lineage[1].clone()).unwrap());
    assert_eq!(chain.head_hash(), Some(lineage[1].get_hash()));
}

#[test]
fn add_block_requires_genesis() {
    let mut chain = new_chain();
    let lineage = make_chain(1);
    assert_eq!(
        chain.add_block(lineage[1].clone()),
        Err(ChainError::NotInitialized)
    );
}

// The simple-fork scenario: two children of the same parent with sigma-diffs 100 and 150. The
// heavier one must end up as head whichever arrives first, and the lighter one stays known.
#[test]
fn fork_choice_prefers_heavier_sigma_diff() {
    for heavier_first in [false, true] {
        let mut chain = new_chain();
        let genesis = make_genesis();
        let lineage = vec![genesis.clone()];
        chain.set_genesis(genesis, now()).unwrap();

        let light = fabricated_child(&lineage, 100, true);
        let heavy = fabricated_child(&lineage, 150, true);

        let (first, second) = if heavier_first {
            (&heavy, &light)
        } else {
            (&light, &heavy)
        };
        chain.add_block(first.clone()).unwrap();
        chain.add_block(second.clone()).unwrap();

        assert_eq!(chain.head_hash(), Some(heavy.get_hash()));
        // The losing fork is retained, not deleted.
        assert!(chain.has_block_hash(&light.get_hash()));
    }
}

#[test]
fn equal_sigma_diff_keeps_the_incumbent_head() {
    let mut chain = new_chain();
    let genesis = make_genesis();
    let lineage = vec![genesis.clone()];
    chain.set_genesis(genesis, now()).unwrap();

    let first = fabricated_child(&lineage, 100, true);
    let mut rival = fabricated_child(&lineage, 100, true);
    rival.increment_nonce();
    mine(&mut rival);
    assert_ne!(first.get_hash(), rival.get_hash());

    chain.add_block(first.clone()).unwrap();
    chain.add_block(rival.clone()).unwrap();
    assert_eq!(chain.head_hash(), Some(first.get_hash()));
}

// Fork-choice monotonicity: the head's sigma-diff never decreases over any add sequence,
// including competing-fork deliveries.
#[test]
fn head_sigma_diff_is_monotonic() {
    let mut chain = new_chain();
    let genesis = make_genesis();
    let lineage = vec![genesis.clone()];
    chain.set_genesis(genesis, now()).unwrap();

    let fork_a1 = fabricated_child(&lineage, 120, true);
    let fork_b1 = fabricated_child(&lineage, 80, true);
    let fork_b2 = fabricated_child(&[lineage[0].clone(), fork_b1.clone()], 200, true);
    let fork_a2 = fabricated_child(&[lineage[0].clone(), fork_a1.clone()], 160, true);

    let mut last_sigma = chain.head().unwrap().header.sigma_diff;
    for block in [&fork_a1, &fork_b1, &fork_b2, &fork_a2] {
        chain.add_block((*block).clone()).unwrap();
        let sigma = chain.head().unwrap().header.sigma_diff;
        assert!(sigma >= last_sigma);
        last_sigma = sigma;
    }
    // The b-fork tip carries the most work overall.
    assert_eq!(chain.head_hash(), Some(fork_b2.get_hash()));
}

// The invalidation-cascade scenario: a block whose state commitment is a lie sits unexposed on
// a side fork until a descendant tries to become head. The replay fails, and the liar plus all
// of its descendants are removed; the chain falls back to the best surviving head.
#[test]
fn deferred_state_failure_invalidates_the_whole_branch() {
    let mut chain = new_chain();
    let genesis = make_genesis();
    chain.set_genesis(genesis.clone(), now()).unwrap();
    let mut lineage = vec![genesis];

    let b1 = make_child(&lineage);
    chain.add_block(b1.clone()).unwrap();
    lineage.push(b1);

    // Honest fork tip at sigma 150.
    let honest = fabricated_child(&lineage, 150, true);
    chain.add_block(honest.clone()).unwrap();
    assert_eq!(chain.head_hash(), Some(honest.get_hash()));

    // Lying fork: bad state root at its base, descendants still under the honest tip's weight.
    let liar = fabricated_child(&lineage, 100, false);
    let mut liar_lineage = lineage.clone();
    liar_lineage.push(liar.clone());
    let child = fabricated_child(&liar_lineage, 120, true);
    liar_lineage.push(child.clone());
    let grandchild = fabricated_child(&liar_lineage, 200, true);

    chain.add_block(liar.clone()).unwrap();
    chain.add_block(child.clone()).unwrap();
    assert!(chain.has_block_hash(&liar.get_hash()));
    assert!(chain.has_block_hash(&child.get_hash()));

    // The grandchild overtakes the honest tip, forcing a reorg through the liar. Replay fails,
    // the cascade removes all three, and the head falls back to the honest tip.
    chain.add_block(grandchild.clone()).unwrap();
    assert!(!chain.has_block_hash(&liar.get_hash()));
    assert!(!chain.has_block_hash(&child.get_hash()));
    assert!(!chain.has_block_hash(&grandchild.get_hash()));
    assert_eq!(chain.head_hash(), Some(honest.get_hash()));

    // The blacklist poisons descendants delivered later.
    let mut poisoned_lineage = liar_lineage.clone();
    poisoned_lineage.push(grandchild);
    let late_descendant = fabricated_child(&poisoned_lineage, 300, true);
    assert!(!chain.add_block(late_descendant.clone()).unwrap());
    assert!(!chain.has_block_hash(&late_descendant.get_hash()));
    assert_eq!(chain.head_hash(), Some(honest.get_hash()));
}

// A dry-run reorganisation validates a candidate branch without moving the head or touching
// committed state.
#[test]
fn test_reorg_is_a_dry_run() {
    let mut chain = new_chain();
    let genesis = make_genesis();
    chain.set_genesis(genesis.clone(), now()).unwrap();
    let mut lineage = vec![genesis];
    let b1 = make_child(&lineage);
    chain.add_block(b1.clone()).unwrap();
    lineage.push(b1.clone());

    // A lighter sibling fork: adding it does not move the head.
    let light_good = fabricated_child(&lineage[..1].to_vec(), 1, true);
    let light_bad = {
        let mut block = fabricated_child(&lineage[..1].to_vec(), 1, false);
        block.increment_nonce();
        mine(&mut block);
        block
    };
    chain.add_block(light_good.clone()).unwrap();
    chain.add_block(light_bad.clone()).unwrap();
    assert_eq!(chain.head_hash(), Some(b1.get_hash()));

    assert!(chain.test_reorg_to(light_good.get_hash()).is_ok());
    assert!(matches!(
        chain.test_reorg_to(light_bad.get_hash()),
        Err(ValidationError::StateRootMismatch { .. })
    ));

    // Neither dry run moved the head, and even the failing candidate is still indexed.
    assert_eq!(chain.head_hash(), Some(b1.get_hash()));
    assert!(chain.has_block_hash(&light_good.get_hash()));
    assert!(chain.has_block_hash(&light_bad.get_hash()));
}

// A candidate produced by the chain, once mined, passes the same validation the builder runs
// on blocks from the network.
#[test]
fn head_candidate_is_fully_valid() {
    let mut chain = new_chain();
    let lineage = make_chain(2);
    chain.set_genesis(lineage[0].clone(), now()).unwrap();
    chain.add_block(lineage[1].clone()).unwrap();
    chain.add_block(lineage[2].clone()).unwrap();

    let mut candidate = chain
        .head_candidate(Vec::new(), BASE_TIMESTAMP + 100)
        .unwrap();
    mine(&mut candidate);

    assert_eq!(candidate.height(), BlockHeight::new(3));
    assert_eq!(candidate.parent_hash(), lineage[2].get_hash());
    candidate.assert_validity(&chain, now()).unwrap();

    // And the chain accepts its own candidate.
    chain.add_block(candidate.clone()).unwrap();
    assert_eq!(chain.head_hash(), Some(candidate.get_hash()));
}

// Path construction yields the half-open range (start, end] and fails cleanly on disjoint
// inputs.
#[test]
fn chain_paths_and_lca() {
    let mut chain = new_chain();
    let lineage = make_chain(3);
    chain.set_genesis(lineage[0].clone(), now()).unwrap();
    for block in &lineage[1..] {
        chain.add_block(block.clone()).unwrap();
    }
    let fork = fabricated_child(&lineage[..2].to_vec(), 1, true);
    chain.add_block(fork.clone()).unwrap();

    let lca = chain
        .find_lca(&lineage[3].get_hash(), &fork.get_hash())
        .unwrap();
    assert_eq!(lca, lineage[1].get_hash());

    let path = chain
        .construct_chain_path(&lineage[0].get_hash(), &lineage[3].get_hash())
        .unwrap();
    assert_eq!(
        path,
        vec![
            lineage[1].get_hash(),
            lineage[2].get_hash(),
            lineage[3].get_hash()
        ]
    );

    let missing = gracht_rs::crypto::global_hash(b"never delivered");
    assert!(matches!(
        chain.construct_chain_path(&lineage[0].get_hash(), &missing),
        Err(ChainError::UnknownBlock(_))
    ));
}
