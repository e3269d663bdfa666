//! The proof-of-work search loop.
//!
//! The miner asks the chain for a candidate block on top of the head, then increments the nonce
//! until the header hash beats the target. The chain raises a restart flag on every head change,
//! so the miner abandons stale candidates promptly; a bounded attempt count forces a refresh
//! (new timestamp, new transactions) even when the head doesn't move.
//!
//! A solved block is not installed directly; it goes through [`SeekNBuild`] like any other
//! block, and the miner polls until the chain confirms acceptance before starting on the next
//! candidate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;

use crate::chain::Chain;
use crate::database::Database;
use crate::logging;
use crate::networking::Network;
use crate::sync::{unix_now, SeekNBuild};

/// Give up on a candidate after this many failed nonces and rebuild it with a fresh timestamp.
const STALE_ATTEMPTS: u64 = 100_000;

pub struct Miner<N: Network, D: Database> {
    chain: Arc<Mutex<Chain<D>>>,
    seek_n_build: Arc<SeekNBuild<N, D>>,
    shutdown: Arc<AtomicBool>,
    restart: Arc<AtomicBool>,
}

impl<N: Network, D: Database> Miner<N, D> {
    pub fn new(chain: Arc<Mutex<Chain<D>>>, seek_n_build: Arc<SeekNBuild<N, D>>) -> Miner<N, D> {
        let restart = chain.lock().unwrap().miner_restart_flag();
        Miner {
            chain,
            seek_n_build,
            shutdown: Arc::new(AtomicBool::new(false)),
            restart,
        }
    }

    /// The flag that stops the mining thread. Keep a clone before calling [`start`](Self::start).
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || self.mine())
    }

    fn mine(&self) {
        while !self.shutting_down() && !self.chain.lock().unwrap().initialized() {
            thread::sleep(Duration::from_millis(100));
        }

        let mut rng = rand::thread_rng();
        while !self.shutting_down() {
            self.restart.store(false, Ordering::SeqCst);

            let candidate = self
                .chain
                .lock()
                .unwrap()
                .head_candidate(Vec::new(), unix_now());
            let mut block = match candidate {
                Ok(block) => block,
                Err(_) => {
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };
            // Start from a random nonce so independent miners don't retrace each other's work.
            block.header.nonce = rng.gen();

            let mut attempts: u64 = 0;
            let mut solved = false;
            while !self.shutting_down() && !self.restart.load(Ordering::SeqCst) {
                block.increment_nonce();
                attempts += 1;
                if block.valid_proof() {
                    solved = true;
                    break;
                }
                if attempts >= STALE_ATTEMPTS {
                    break;
                }
            }
            if !solved {
                continue;
            }

            logging::info_mined_block(&block.get_hash(), block.height());
            let hash = block.get_hash();
            self.seek_n_build.add_block(block);

            // Wait until the chain confirms acceptance before mining the next block.
            while !self.shutting_down() && !self.restart.load(Ordering::SeqCst) {
                if self.chain.lock().unwrap().has_block_hash(&hash) {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
