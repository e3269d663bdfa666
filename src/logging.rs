//! Functions that log out events.
//!
//! The node logs through the [log](https://docs.rs/log/latest/log/) facade. To get these messages
//! printed onto a terminal or to a file, install a logging implementation; [`init`] sets up a
//! plain stdout dispatcher for binaries and tests that don't bring their own.
//!
//! ## Log message format
//!
//! Log messages are CSVs with at least two values. The first two are always:
//! 1. The name of the event in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (seconds since the Unix Epoch).
//!
//! The rest differ by event. Hashes are printed as the first seven characters of their Base64
//! encoding, e.g.:
//!
//! ```text
//! AddBlock, 1701329264, fNGCJyk, 42
//! ```

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use log::LevelFilter;

use crate::errors::{ChainError, ValidationError};
use crate::types::basic::{BlockHeight, CryptoHash};

// Names of each event in PascalCase for printing:
pub const ADD_BLOCK: &str = "AddBlock";
pub const NEW_HEAD: &str = "NewHead";
pub const SET_GENESIS: &str = "SetGenesis";
pub const MARK_INVALID: &str = "MarkInvalid";
pub const REORG_FAILED: &str = "ReorgFailed";
pub const REJECT_BLOCK: &str = "RejectBlock";
pub const REQUEST_BLOCKS: &str = "RequestBlocks";
pub const BROADCAST_BLOCK: &str = "BroadcastBlock";
pub const BUILDER_ERROR: &str = "BuilderError";
pub const MINED_BLOCK: &str = "MinedBlock";
pub const BAD_PEER_PAYLOAD: &str = "BadPeerPayload";

/// Install a stdout logger at the given level. Safe to call more than once; later calls are
/// no-ops because a logger may only be installed once per process.
pub fn init(level: LevelFilter) {
    let _ = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(level)
        .chain(io::stdout())
        .apply();
}

pub(crate) fn info_add_block(hash: &CryptoHash, height: BlockHeight) {
    log::info!("{}, {}, {}, {}", ADD_BLOCK, now_secs(), short(hash), height);
}

pub(crate) fn info_new_head(hash: &CryptoHash, height: BlockHeight) {
    log::info!("{}, {}, {}, {}", NEW_HEAD, now_secs(), short(hash), height);
}

pub(crate) fn info_set_genesis(hash: &CryptoHash) {
    log::info!("{}, {}, {}", SET_GENESIS, now_secs(), short(hash));
}

pub(crate) fn info_mark_invalid(hash: &CryptoHash) {
    log::info!("{}, {}, {}", MARK_INVALID, now_secs(), short(hash));
}

pub(crate) fn debug_reorg_failed(hash: &CryptoHash, error: &ValidationError) {
    log::debug!("{}, {}, {}, {}", REORG_FAILED, now_secs(), short(hash), error);
}

pub(crate) fn debug_reject_block(hash: &CryptoHash, error: &ValidationError) {
    log::debug!("{}, {}, {}, {}", REJECT_BLOCK, now_secs(), short(hash), error);
}

pub(crate) fn debug_request_blocks(count: usize) {
    log::debug!("{}, {}, {}", REQUEST_BLOCKS, now_secs(), count);
}

pub(crate) fn debug_broadcast_block(hash: &CryptoHash) {
    log::debug!("{}, {}, {}", BROADCAST_BLOCK, now_secs(), short(hash));
}

pub(crate) fn debug_builder_error(error: &ChainError) {
    log::debug!("{}, {}, {}", BUILDER_ERROR, now_secs(), error);
}

pub(crate) fn info_mined_block(hash: &CryptoHash, height: BlockHeight) {
    log::info!("{}, {}, {}, {}", MINED_BLOCK, now_secs(), short(hash), height);
}

pub(crate) fn debug_bad_peer_payload(error: &ValidationError) {
    log::debug!("{}, {}, {}", BAD_PEER_PAYLOAD, now_secs(), error);
}

// Get a more readable representation of a hash by base64-encoding it and taking the first 7
// characters.
fn short(hash: &CryptoHash) -> String {
    let encoded = STANDARD_NO_PAD.encode(hash.bytes());
    encoded[..7].to_string()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
