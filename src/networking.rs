//! Pluggable peer-to-peer networking.
//!
//! The node has modular networking: transports interact with the core through implementations of
//! the [`Network`] trait and never the other way around: the core treats peers as opaque
//! [`PeerId`]s and never inspects transport internals.
//!
//! The wire catalogue is small:
//! - [`Intro`]: the handshake, carrying the sender's top block hash. Sent whenever a connection
//!   is established; an unknown top block is immediately sought.
//! - `Blocks`: a batch of serialized blocks, pushed in response to requests or on acceptance of
//!   a new block.
//! - `RequestBlocks`: a batch of wanted block hashes.
//!
//! [`start_polling`] runs the receive loop on its own thread, dispatching incoming messages into
//! the [`Chain`] and [`SeekNBuild`]. A malformed or inconsistent payload is logged and dropped;
//! one bad peer must never stall ingestion.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::chain::Chain;
use crate::database::Database;
use crate::logging;
use crate::sync::{unix_now, SeekNBuild};
use crate::types::basic::{BytesList, CryptoHash, HashList};
use crate::types::block::Block;

/// An opaque peer handle. Meaningful only to the transport that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

/// The handshake message: the sender's current best block.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Intro {
    pub top_block: CryptoHash,
}

/// Every message variant exchanged between peers.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum Message {
    Intro(Intro),
    Blocks(BytesList),
    RequestBlocks(HashList),
}

impl From<Intro> for Message {
    fn from(intro: Intro) -> Message {
        Message::Intro(intro)
    }
}

/// What a transport reports when polled.
pub enum NetworkEvent {
    /// A connection to `PeerId` was established; the core answers with an [`Intro`].
    Connected(PeerId),
    Message(PeerId, Message),
}

/// The interface a peer-to-peer transport provides to the core.
pub trait Network: Clone + Send + 'static {
    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: PeerId, message: Message);

    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: Message);

    /// Any currently connected peer, or `None` if the peer set is transiently empty.
    fn random_peer(&mut self) -> Option<PeerId>;

    /// The next pending event, or `None` if nothing is available right now.
    fn recv(&mut self) -> Option<NetworkEvent>;

    /// Report a peer that sent undecodable or inconsistent data. Transports may score or drop
    /// the peer; the core itself never escalates past this call.
    fn misbehaving(&mut self, peer: PeerId) {
        let _ = peer;
    }
}

/// Spawn the receive loop: poll `network` for events and dispatch them into the chain and the
/// acquisition pipeline. Returns the thread handle; send `()` on the paired channel to stop it.
pub(crate) fn start_polling<N: Network, D: Database>(
    mut network: N,
    chain: Arc<Mutex<Chain<D>>>,
    seek_n_build: Arc<SeekNBuild<N, D>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => panic!("poller thread disconnected from node"),
        }

        match network.recv() {
            Some(NetworkEvent::Connected(peer)) => {
                let top_block = chain.lock().unwrap().head_hash();
                if let Some(top_block) = top_block {
                    network.send(peer, Message::Intro(Intro { top_block }));
                }
            }
            Some(NetworkEvent::Message(peer, message)) => {
                on_message(&mut network, &chain, &seek_n_build, peer, message)
            }
            None => thread::sleep(Duration::from_millis(10)),
        }
    })
}

fn on_message<N: Network, D: Database>(
    network: &mut N,
    chain: &Arc<Mutex<Chain<D>>>,
    seek_n_build: &Arc<SeekNBuild<N, D>>,
    origin: PeerId,
    message: Message,
) {
    match message {
        Message::Intro(intro) => {
            let known = chain.lock().unwrap().has_block_hash(&intro.top_block);
            if !known && !intro.top_block.is_zero() {
                seek_n_build.seek_hash(intro.top_block);
            }
        }
        Message::Blocks(block_list) => {
            for serialized in block_list.iter() {
                let block = match Block::deserialize(serialized) {
                    Ok(block) => block,
                    Err(error) => {
                        logging::debug_bad_peer_payload(&error);
                        network.misbehaving(origin);
                        continue;
                    }
                };
                if let Err(error) = block.assert_internal_consistency(unix_now()) {
                    logging::debug_bad_peer_payload(&error);
                    network.misbehaving(origin);
                    continue;
                }
                let related = block.related_blocks();
                seek_n_build.add_block(block);
                seek_n_build.seek_many_with_priority(related);
            }
        }
        Message::RequestBlocks(requests) => {
            let mut blocks_to_send = BytesList::default();
            {
                let chain = chain.lock().unwrap();
                for hash in requests.iter() {
                    if let Some(block) = chain.get_block(hash) {
                        blocks_to_send.push(block.serialize());
                    }
                }
            }
            if !blocks_to_send.is_empty() {
                network.send(origin, Message::Blocks(blocks_to_send));
            }
        }
    }
}
