//! Methods to build, run, and tear down a node.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec) with:
//!   1. `NodeSpec::builder` to construct a `NodeSpecBuilder`,
//!   2. The setters of the `NodeSpecBuilder`, and
//!   3. The `NodeSpecBuilder::build` method to construct a [`NodeSpec`],
//! - The function to [start](NodeSpec::start) a [`Node`] given its specification,
//! - [The type](Node) which keeps the node alive.
//!
//! ## Starting a node
//!
//! ```ignore
//! let node = NodeSpec::builder()
//!     .network(network)
//!     .database(MemoryDb::new())
//!     .state_maker(state_maker)
//!     .genesis(genesis_bytes)
//!     .configuration(Configuration::builder().mine(true).build())
//!     .build()
//!     .start()?;
//! ```
//!
//! The genesis block is accepted as an opaque serialized blob and handed to the codec; the
//! `state_maker` carries whatever sub-ledgers the deployment registers.
//!
//! Dropping the [`Node`] shuts everything down cooperatively: each loop observes its shutdown
//! signal at the top of its next iteration and the destructor joins them in dependency order.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::chain::Chain;
use crate::database::Database;
use crate::errors::{ChainError, ValidationError};
use crate::miner::Miner;
use crate::networking::{start_polling, Network};
use crate::state::state_maker::StateMaker;
use crate::sync::{unix_now, SeekNBuild, SyncConfig};
use crate::types::block::Block;

/// User-defined parameters governing the node's loops.
#[derive(Clone, Debug, TypedBuilder)]
pub struct Configuration {
    /// How long to wait for a requested block before re-requesting it.
    #[builder(default = Duration::from_secs(10))]
    pub request_timeout: Duration,

    /// Seeker poll interval when idle.
    #[builder(default = Duration::from_millis(100))]
    pub seek_poll: Duration,

    /// Builder poll interval when the past queue is empty or not yet actionable.
    #[builder(default = Duration::from_millis(50))]
    pub build_poll: Duration,

    /// Run the proof-of-work miner loop.
    #[builder(default = false)]
    pub mine: bool,
}

/// Everything required to start a node: the trait implementations (network transport, database)
/// plus the genesis blob, sub-ledger registry, and configuration.
#[derive(TypedBuilder)]
pub struct NodeSpec<N: Network, D: Database> {
    network: N,
    database: D,
    state_maker: StateMaker,
    /// Serialized genesis block, treated as an opaque blob until the codec decodes it.
    genesis: Vec<u8>,
    configuration: Configuration,
}

/// Why a node failed to start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeStartError {
    /// The genesis blob could not be decoded.
    UndecodableGenesis(ValidationError),
    /// The genesis block was rejected by the chain.
    Chain(ChainError),
}

impl Display for NodeStartError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NodeStartError::UndecodableGenesis(error) => {
                write!(f, "could not decode genesis blob: {}", error)
            }
            NodeStartError::Chain(error) => write!(f, "could not set genesis: {}", error),
        }
    }
}

impl<N: Network, D: Database> NodeSpec<N, D> {
    /// Decode and install the genesis block, then start all threads associated with running a
    /// node, returning the handles to them in a [`Node`].
    pub fn start(self) -> Result<Node<N, D>, NodeStartError> {
        let genesis_block =
            Block::deserialize(&self.genesis).map_err(NodeStartError::UndecodableGenesis)?;

        let mut chain = Chain::new(self.database, self.state_maker);
        chain
            .set_genesis(genesis_block, unix_now())
            .map_err(NodeStartError::Chain)?;
        let chain = Arc::new(Mutex::new(chain));

        let seek_n_build = Arc::new(SeekNBuild::new(
            chain.clone(),
            self.network.clone(),
            SyncConfig {
                request_timeout: self.configuration.request_timeout,
                seek_poll: self.configuration.seek_poll,
                build_poll: self.configuration.build_poll,
            },
        ));
        let sync_threads = seek_n_build.start();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(
            self.network,
            chain.clone(),
            seek_n_build.clone(),
            poller_shutdown_receiver,
        );

        let (miner_shutdown, miner_thread) = if self.configuration.mine {
            let miner = Miner::new(chain.clone(), seek_n_build.clone());
            let shutdown = miner.shutdown_flag();
            (Some(shutdown), Some(miner.start()))
        } else {
            (None, None)
        };

        Ok(Node {
            chain,
            seek_n_build,
            sync_threads,
            poller: Some(poller),
            poller_shutdown,
            miner_shutdown,
            miner_thread,
        })
    }
}

/// A handle to the background threads of a running node. Dropping this value gracefully shuts
/// all of them down.
pub struct Node<N: Network, D: Database> {
    chain: Arc<Mutex<Chain<D>>>,
    seek_n_build: Arc<SeekNBuild<N, D>>,
    sync_threads: Vec<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    miner_shutdown: Option<Arc<AtomicBool>>,
    miner_thread: Option<JoinHandle<()>>,
}

impl<N: Network, D: Database> Node<N, D> {
    pub fn chain(&self) -> Arc<Mutex<Chain<D>>> {
        self.chain.clone()
    }

    pub fn seek_n_build(&self) -> Arc<SeekNBuild<N, D>> {
        self.seek_n_build.clone()
    }
}

impl<N: Network, D: Database> Drop for Node<N, D> {
    fn drop(&mut self) {
        // Shutdown order matters: the miner feeds the pipeline and the pipeline's builder feeds
        // the chain, while the poller only observes. Stop producers before consumers.
        if let Some(shutdown) = &self.miner_shutdown {
            shutdown.store(true, Ordering::SeqCst);
        }
        if let Some(miner) = self.miner_thread.take() {
            let _ = miner.join();
        }

        self.seek_n_build.shutdown();
        for handle in self.sync_threads.drain(..) {
            let _ = handle.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}
