//! Configuration for aggregate energy transfer and assembly liveness.

use serde::{Deserialize, Serialize};

use crate::types::{
    DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_MAX_EXTRACT_PER_TX, DEFAULT_MAX_RECEIVE_PER_TX,
};

/// Process-wide configuration, read once at ledger construction.
///
/// Loading this from disk or command line is the host's job; the struct only
/// needs to deserialize from whatever configuration source the host uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Upper bound on the amount granted by a single insert (default: 1024).
    pub max_receive_per_tx: i64,
    /// Upper bound on the amount granted by a single extract (default: 1024).
    pub max_extract_per_tx: i64,
    /// How long an assembly may stay silent before the sweep evicts it
    /// (default: 5000). Best-effort: a report racing the sweep may land on
    /// either side of the eviction.
    pub heartbeat_timeout_ms: i64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            max_receive_per_tx: DEFAULT_MAX_RECEIVE_PER_TX,
            max_extract_per_tx: DEFAULT_MAX_EXTRACT_PER_TX,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
        }
    }
}
