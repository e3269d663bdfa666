//! The block acquisition pipeline: seek-and-build.
//!
//! [`SeekNBuild`] is responsible for acquiring every block the node hears about and feeding them
//! into the [`Chain`] in height order, so the chain can find the heaviest proof-of-work chain
//! possible. Two loops share the work:
//!
//! - The **seeker** requests wanted blocks from peers in batches, re-requesting anything a peer
//!   has sat on past the timeout.
//! - The **builder** pops received blocks lowest-height-first, validates them against the chain,
//!   and inserts them, setting aside blocks whose parents haven't arrived yet.
//!
//! Every hash moves through exactly one forward path, `future → present → past → done`
//! (with a `present → future`-style retry loop on timeout), and occupies at most one of those
//! sets at any time. Each set is paired with a priority queue under one lock, and every
//! transition mutates the set and queue together in a single critical section.
//!
//! Both loops block only on bounded sleeps, check a shared shutdown flag every iteration, and
//! treat per-block failures as disposable: a malicious peer's invalid block is logged and
//! dropped, never allowed to halt ingestion of everything else.

use std::cmp::{min, Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::chain::Chain;
use crate::database::Database;
use crate::logging;
use crate::networking::{Message, Network};
use crate::types::basic::{BytesList, CryptoHash, HashList};
use crate::types::block::Block;

/// Priority tag marking a hash requested explicitly (e.g. a peer's intro top block): always
/// drained before height-tagged wants.
const URGENT_PRIORITY: i64 = -1;

/// Tunables for the two loops.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// How long a requested block may sit unanswered before it is re-requested.
    pub request_timeout: Duration,
    /// Seeker poll interval when there is nothing to request.
    pub seek_poll: Duration,
    /// Builder poll interval when the past queue is empty or not yet actionable.
    pub build_poll: Duration,
}

impl Default for SyncConfig {
    fn default() -> SyncConfig {
        SyncConfig {
            request_timeout: Duration::from_secs(10),
            seek_poll: Duration::from_millis(100),
            build_poll: Duration::from_millis(50),
        }
    }
}

/// A received block waiting for ordered insertion. The atomically issued nonce breaks height
/// ties deterministically (FIFO within a height) and gives the heap a total order without
/// comparing blocks themselves.
struct PastEntry {
    height: u64,
    nonce: u64,
    block: Block,
}

impl PartialEq for PastEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.height, self.nonce) == (other.height, other.nonce)
    }
}

impl Eq for PastEntry {}

impl PartialOrd for PastEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PastEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.height, self.nonce).cmp(&(other.height, other.nonce))
    }
}

struct FutureQueue {
    set: HashSet<CryptoHash>,
    queue: BinaryHeap<Reverse<(i64, CryptoHash)>>,
}

struct PresentQueue {
    set: HashSet<CryptoHash>,
    queue: BinaryHeap<Reverse<(Instant, CryptoHash)>>,
}

struct PastQueue {
    set: HashSet<CryptoHash>,
    queue: BinaryHeap<Reverse<PastEntry>>,
    /// Blocks set aside because their direct parent hasn't arrived. Recycled into the main
    /// queue whenever the builder stalls.
    no_parent: BinaryHeap<Reverse<PastEntry>>,
}

/// Which of the pipeline sets a hash currently occupies. At most one flag should ever be set,
/// a property the test suite leans on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueOccupancy {
    pub future: bool,
    pub present: bool,
    pub past: bool,
    pub done: bool,
}

impl QueueOccupancy {
    pub fn count(&self) -> usize {
        [self.future, self.present, self.past, self.done]
            .iter()
            .filter(|occupied| **occupied)
            .count()
    }
}

/// The acquisition pipeline. Shared behind an [`Arc`] between its own two loops, the network
/// poller, and the miner.
pub struct SeekNBuild<N: Network, D: Database> {
    chain: Arc<Mutex<Chain<D>>>,
    network: Mutex<N>,
    config: SyncConfig,
    nonces: AtomicU64,
    future: Mutex<FutureQueue>,
    present: Mutex<PresentQueue>,
    past: Mutex<PastQueue>,
    done: Mutex<HashSet<CryptoHash>>,
    /// Superset membership tracker: every hash this pipeline has ever taken responsibility for.
    all: Mutex<HashSet<CryptoHash>>,
    shutdown: AtomicBool,
}

impl<N: Network, D: Database> SeekNBuild<N, D> {
    pub fn new(chain: Arc<Mutex<Chain<D>>>, network: N, config: SyncConfig) -> SeekNBuild<N, D> {
        SeekNBuild {
            chain,
            network: Mutex::new(network),
            config,
            nonces: AtomicU64::new(0),
            future: Mutex::new(FutureQueue {
                set: HashSet::new(),
                queue: BinaryHeap::new(),
            }),
            present: Mutex::new(PresentQueue {
                set: HashSet::new(),
                queue: BinaryHeap::new(),
            }),
            past: Mutex::new(PastQueue {
                set: HashSet::new(),
                queue: BinaryHeap::new(),
                no_parent: BinaryHeap::new(),
            }),
            done: Mutex::new(HashSet::new()),
            all: Mutex::new(HashSet::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Spawn the seeker and builder loops. The caller keeps the handles and joins them after
    /// [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let seeker = {
            let this = Arc::clone(self);
            thread::spawn(move || this.block_seeker())
        };
        let builder = {
            let this = Arc::clone(self);
            thread::spawn(move || this.chain_builder())
        };
        vec![seeker, builder]
    }

    /// Ask both loops to wind down. They observe the flag within one bounded sleep.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// How many blocks to request in one batch: more aggressive on longer chains, never fewer
    /// than 5 nor more than 500.
    pub fn max_blocks_at_once(&self) -> usize {
        let height = self.chain.lock().unwrap().get_height().int();
        min(500, (height / 3).max(5)) as usize
    }

    /// Hand a received, internally consistent block to the builder.
    pub fn add_block(&self, block: Block) {
        let hash = block.get_hash();
        if self.done.lock().unwrap().contains(&hash) {
            return;
        }
        if self.past.lock().unwrap().set.contains(&hash) {
            return;
        }
        self.all.lock().unwrap().insert(hash);

        // The block is in hand: it leaves `future`/`present` membership now, so a hash never
        // occupies two pipeline sets at once. Stale queue entries are dropped when popped.
        self.future.lock().unwrap().set.remove(&hash);
        self.present.lock().unwrap().set.remove(&hash);

        let entry = PastEntry {
            height: block.height().int(),
            nonce: self.nonces.fetch_add(1, Ordering::SeqCst),
            block,
        };
        let mut past = self.past.lock().unwrap();
        past.set.insert(hash);
        past.queue.push(Reverse(entry));
    }

    /// Want `hash` urgently: drained before every height-tagged want. A hash the pipeline
    /// already tracks is left wherever it is.
    pub fn seek_hash(&self, hash: CryptoHash) {
        let mut all = self.all.lock().unwrap();
        if all.contains(&hash) {
            return;
        }
        all.insert(hash);
        drop(all);
        let mut future = self.future.lock().unwrap();
        future.queue.push(Reverse((URGENT_PRIORITY, hash)));
        future.set.insert(hash);
    }

    /// Want the block `hash` believed to sit at `height`, unless it is already tracked.
    pub fn seek_with_priority(&self, height: u64, hash: CryptoHash) {
        let mut all = self.all.lock().unwrap();
        if all.contains(&hash) {
            return;
        }
        all.insert(hash);
        drop(all);
        let mut future = self.future.lock().unwrap();
        future.queue.push(Reverse((height as i64, hash)));
        future.set.insert(hash);
    }

    pub fn seek_many_with_priority(&self, wanted: impl IntoIterator<Item = (u64, CryptoHash)>) {
        for (height, hash) in wanted {
            self.seek_with_priority(height, hash);
        }
    }

    /// Announce an accepted block to all peers.
    pub fn broadcast_block(&self, block: &Block) {
        let message = Message::Blocks(BytesList::new(vec![block.serialize()]));
        self.network.lock().unwrap().broadcast(message);
        logging::debug_broadcast_block(&block.get_hash());
    }

    /// Which pipeline sets `hash` currently occupies. Introspection for debugging and tests.
    pub fn occupancy(&self, hash: &CryptoHash) -> QueueOccupancy {
        QueueOccupancy {
            future: self.future.lock().unwrap().set.contains(hash),
            present: self.present.lock().unwrap().set.contains(hash),
            past: self.past.lock().unwrap().set.contains(hash),
            done: self.done.lock().unwrap().contains(hash),
        }
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn wait_until_initialized(&self) {
        while !self.shutting_down() && !self.chain.lock().unwrap().initialized() {
            thread::sleep(self.config.seek_poll);
        }
    }

    /// The seeker loop: sweep timed-out requests, batch up wants, and fire one `request_blocks`
    /// at a single live peer.
    fn block_seeker(&self) {
        self.wait_until_initialized();
        while !self.shutting_down() {
            let mut requesting: Vec<CryptoHash> = Vec::new();

            // 1. Re-queue requests that have gone unanswered past the timeout.
            {
                let mut present = self.present.lock().unwrap();
                loop {
                    match present.queue.peek() {
                        Some(Reverse((stamped, _)))
                            if stamped.elapsed() > self.config.request_timeout =>
                        {
                            let Reverse((_, hash)) = present.queue.pop().expect("peeked entry");
                            if present.set.contains(&hash) {
                                requesting.push(hash);
                            }
                        }
                        _ => break,
                    }
                }
            }

            // 2. Fill the rest of the batch from the future queue, most urgent first.
            {
                let max_batch = self.max_blocks_at_once();
                let mut future = self.future.lock().unwrap();
                let to_get = min(future.set.len(), max_batch).saturating_sub(requesting.len());
                for _ in 0..to_get {
                    let Some(Reverse((priority, hash))) = future.queue.pop() else {
                        break;
                    };
                    if !future.set.remove(&hash) {
                        continue; // stale queue entry
                    }
                    // Height tag zero is the genesis block, which never comes from peers.
                    if priority != 0 {
                        requesting.push(hash);
                    }
                }

                // 3. Stamp everything in the batch as in-flight.
                let mut present = self.present.lock().unwrap();
                for hash in &requesting {
                    present.queue.push(Reverse((Instant::now(), *hash)));
                    present.set.insert(*hash);
                }
            }

            // 4. One message, one peer. Tolerate a transiently empty peer set.
            if !requesting.is_empty() {
                let message = Message::RequestBlocks(HashList::new(requesting.clone()));
                loop {
                    if self.shutting_down() {
                        return;
                    }
                    let peer = self.network.lock().unwrap().random_peer();
                    match peer {
                        Some(peer) => {
                            self.network.lock().unwrap().send(peer, message.clone());
                            logging::debug_request_blocks(requesting.len());
                            break;
                        }
                        None => thread::sleep(Duration::from_millis(10)),
                    }
                }
            } else {
                thread::sleep(self.config.seek_poll);
            }
        }
    }

    /// The builder loop: feed received blocks into the chain in height order.
    fn chain_builder(&self) {
        self.wait_until_initialized();
        while !self.shutting_down() {
            let entry = match self.past.lock().unwrap().queue.pop() {
                Some(Reverse(entry)) => entry,
                None => {
                    thread::sleep(self.config.build_poll);
                    continue;
                }
            };
            // The genesis block is supplied locally, never built from the network.
            if entry.height == 0 {
                continue;
            }
            let hash = entry.block.get_hash();

            let chain_height = self.chain.lock().unwrap().get_height().int();
            if entry.height > chain_height + 1 {
                // Not yet actionable. Re-enqueue it, and give previously parentless blocks
                // another chance: their ancestors may have landed since.
                let mut past = self.past.lock().unwrap();
                while let Some(parked) = past.no_parent.pop() {
                    past.queue.push(parked);
                }
                past.queue.push(Reverse(entry));
                drop(past);
                thread::sleep(self.config.build_poll);
                continue;
            }

            // Validation and insertion happen under one chain lock: `add_block` must be
            // serialized with concurrent reorg attempts.
            let mut chain = self.chain.lock().unwrap();
            if chain.has_block_hash(&hash) {
                drop(chain);
                self.retire(&hash);
                continue;
            }
            if !chain.has_block_hash(&entry.block.parent_hash()) {
                drop(chain);
                self.past.lock().unwrap().no_parent.push(Reverse(entry));
                continue;
            }
            if let Err(error) = entry.block.assert_validity(&chain, unix_now()) {
                // A bad block from a buggy or malicious peer is dropped, never fatal.
                logging::debug_reject_block(&hash, &error);
                drop(chain);
                self.past.lock().unwrap().set.remove(&hash);
                continue;
            }
            match chain.add_block(entry.block.clone()) {
                Ok(_) => {
                    drop(chain);
                    self.retire(&hash);
                    self.broadcast_block(&entry.block);
                }
                Err(error) => {
                    logging::debug_builder_error(&error);
                    drop(chain);
                    self.past.lock().unwrap().set.remove(&hash);
                }
            }
        }
    }

    /// Move a hash from `past` to `done`. The removal and insertion happen under the `past`
    /// lock so the hash is never observable in both.
    fn retire(&self, hash: &CryptoHash) {
        let mut past = self.past.lock().unwrap();
        past.set.remove(hash);
        self.done.lock().unwrap().insert(*hash);
        drop(past);
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
