//! The layered world state: delta chains, sub-ledgers, and the orchestrator binding them.
//!
//! State is organized as a chain of copy-on-write deltas mirroring the block chain
//! ([`delta`]), partitioned into named sub-ledgers ([`dapp`]), and coordinated by the
//! [`StateMaker`](state_maker::StateMaker), which drives checkpointing, speculative branches,
//! and the replay that powers reorganisations.

pub mod dapp;

pub mod delta;

pub mod state_maker;
