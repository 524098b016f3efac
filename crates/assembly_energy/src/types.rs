//! Core type definitions: ids, positions, constants, and time helpers.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ============================================================================
// Type Aliases
// ============================================================================

/// Stable identity of a mobile assembly, supplied by the host driver.
pub type AssemblyId = Uuid;

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_MAX_RECEIVE_PER_TX: i64 = 1024;
pub const DEFAULT_MAX_EXTRACT_PER_TX: i64 = 1024;
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: i64 = 5_000;

// ============================================================================
// Positions
// ============================================================================

/// Position of a member component within its assembly.
///
/// Positions are local to the assembly, not world coordinates, so they stay
/// stable while the assembly moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

// ============================================================================
// Time
// ============================================================================

/// Current wall-clock time in unix milliseconds.
pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
