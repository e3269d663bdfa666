//! Shared helpers for the integration tests: a block factory producing fully valid
//! easy-target chains, and a channel-backed mock network.
#![allow(dead_code)]

pub(crate) mod blocks;

pub(crate) mod network;

use log::LevelFilter;

/// Install a stdout logger for a test run. Safe to call from every test.
pub(crate) fn setup_logger(level: LevelFilter) {
    gracht_rs::logging::init(level);
}
