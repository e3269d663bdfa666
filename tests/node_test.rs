//! Whole-node tests: the assembled threads mining on an easy target, and two nodes converging
//! through the intro/request/blocks message flow.

mod common;

use std::time::{Duration, Instant};

use common::blocks::{make_chain, tx_prism_state_maker};
use common::network::{connect, mock_network};
use gracht_rs::database::MemoryDb;
use gracht_rs::node::{Configuration, NodeSpec};
use gracht_rs::types::basic::BlockHeight;

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

#[test]
fn a_mining_node_grows_its_own_chain() {
    common::setup_logger(log::LevelFilter::Info);

    let network = mock_network(1).remove(0);
    let genesis = make_chain(0).remove(0);

    let node = NodeSpec::builder()
        .network(network)
        .database(MemoryDb::new())
        .state_maker(tx_prism_state_maker())
        .genesis(genesis.serialize())
        .configuration(Configuration::builder().mine(true).build())
        .build()
        .start()
        .unwrap();

    let chain = node.chain();
    assert!(
        wait_for(
            || chain.lock().unwrap().get_height() >= BlockHeight::new(2),
            Duration::from_secs(30)
        ),
        "miner failed to extend the chain"
    );
    // Dropping the node joins every thread.
    drop(node);
}

// A node that has the chain and a node that only has genesis exchange intros; the lagging node
// seeks, requests, and builds until it converges on the peer's head.
#[test]
fn a_lagging_node_syncs_from_a_peer() {
    common::setup_logger(log::LevelFilter::Info);

    let mut stubs = mock_network(2);
    let network_a = stubs.remove(0);
    let network_b = stubs.remove(0);

    let lineage = make_chain(5);
    let genesis_bytes = lineage[0].serialize();

    let configuration = Configuration::builder()
        .request_timeout(Duration::from_millis(500))
        .build();

    let node_a = NodeSpec::builder()
        .network(network_a.clone())
        .database(MemoryDb::new())
        .state_maker(tx_prism_state_maker())
        .genesis(genesis_bytes.clone())
        .configuration(configuration.clone())
        .build()
        .start()
        .unwrap();

    let node_b = NodeSpec::builder()
        .network(network_b.clone())
        .database(MemoryDb::new())
        .state_maker(tx_prism_state_maker())
        .genesis(genesis_bytes)
        .configuration(configuration)
        .build()
        .start()
        .unwrap();

    // Seed node A with the full chain through its own pipeline.
    for block in lineage.iter().skip(1) {
        node_a.seek_n_build().add_block(block.clone());
    }
    let tip = lineage[5].get_hash();
    assert!(
        wait_for(
            || node_a.chain().lock().unwrap().head_hash() == Some(tip),
            Duration::from_secs(10)
        ),
        "seed node never reached the tip"
    );

    // Bring the connection up; intros cross, and B chases A's head.
    connect(&network_a, &network_b);
    assert!(
        wait_for(
            || node_b.chain().lock().unwrap().head_hash() == Some(tip),
            Duration::from_secs(30)
        ),
        "lagging node never converged on the peer's head"
    );

    drop(node_b);
    drop(node_a);
}
