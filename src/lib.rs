//! A minimal proof-of-work blockchain node core.
//!
//! gracht_rs ingests candidate blocks from peers, resolves competing forks by cumulative
//! difficulty, and maintains a layered, checkpointable key-value world state that is rolled back
//! and replayed as the canonical chain changes.
//!
//! The tightly coupled core:
//! - [`chain`]: the fork-choice engine. Tracks all known blocks, selects the best chain by
//!   sigma-diff, and performs reorganisations.
//! - [`sync`]: the seek-and-build acquisition pipeline. Requests missing ancestors from peers,
//!   buffers out-of-order arrivals, and feeds validated blocks into the chain in height order.
//! - [`state`]: the layered state-delta store: persistent, structurally shared, copy-on-write,
//!   with checkpointing, hardening, pruning, and speculative trial/future branches.
//! - [`crypto`]: content addressing and Merkle commitments tying blocks to their transactions
//!   and state.
//!
//! Around it, the comparatively mechanical glue: [`types`] (headers, blocks, transactions),
//! [`networking`] (the pluggable transport trait and wire catalogue), [`database`] (the
//! pluggable store with ancestor/children indices), [`miner`] (the nonce search), and [`node`]
//! (assembly and lifecycle).
//!
//! Peer transport, serialization codec, RPC, and CLI live outside this crate; the node treats
//! them as collaborators behind the [`networking::Network`] and [`database::Database`] traits
//! and a genesis blob handed in at startup.

pub mod chain;

pub mod crypto;

pub mod database;

pub mod errors;

pub mod logging;

pub mod miner;

pub mod networking;

pub mod node;

pub mod state;

pub mod sync;

pub mod types;
