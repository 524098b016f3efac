//! Aggregated energy storage for mobile assemblies.
//!
//! A mobile assembly of discrete energy-storing components behaves, from the
//! outside, as one unified reservoir. This crate is organized into:
//! - `types`: ids, positions, constants, time helpers
//! - `config`: per-transaction clamps and the liveness timeout
//! - `snapshot`: the durable snapshot format and shared record handle
//! - `cell`: Cell Record (one component's exposed state)
//! - `transaction`: transaction scope (undo log + deferred settlement)
//! - `ledger`: Aggregate Ledger (per-assembly totals + transfer protocol)
//! - `registry`: Assembly Registry (identity map + heartbeat sweep)

mod cell;
mod config;
mod ledger;
mod registry;
mod snapshot;
mod transaction;
mod types;


pub use cell::{EnergyCell, InvalidRecordError};
pub use config::EnergyConfig;
pub use ledger::{EnergyLedger, EnergyStorage};
pub use registry::AssemblyRegistry;
pub use snapshot::{CellSnapshot, EnergyContent, SnapshotHandle, SnapshotIoError};
pub use transaction::{ConsistencyFault, Flow, Transaction};
pub use types::{
    now_unix_ms, AssemblyId, CellPos, DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_MAX_EXTRACT_PER_TX,
    DEFAULT_MAX_RECEIVE_PER_TX,
};
