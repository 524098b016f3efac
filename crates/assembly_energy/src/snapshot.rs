//! Durable snapshot format for member components, plus the shared handle
//! through which write-through persistence happens.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// Snapshot Record
// ============================================================================

/// Shared handle to a host-owned snapshot record. The host and the cell
/// observe the same record; writing through the handle is what persists.
pub type SnapshotHandle = Arc<Mutex<CellSnapshot>>;

/// One component's host-persisted state.
///
/// A record is "energy-bearing" when it carries an `energy_content` section;
/// records without it are ignored by member reports. Host fields this crate
/// does not know about round-trip untouched through `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CellSnapshot {
    #[serde(default)]
    pub energy_capacity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_content: Option<EnergyContent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The energy-bearing section of a snapshot record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EnergyContent {
    #[serde(default)]
    pub energy: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CellSnapshot {
    /// Build an energy-bearing record from scratch (mostly for tests and
    /// hosts that seed fresh components).
    pub fn new_energy_bearing(capacity: i64, energy: i64) -> Self {
        Self {
            energy_capacity: capacity,
            energy_content: Some(EnergyContent {
                energy,
                extra: Map::new(),
            }),
            extra: Map::new(),
        }
    }

    /// Whether this record marks an energy-storing controller.
    pub fn is_energy_bearing(&self) -> bool {
        self.energy_content.is_some()
    }

    /// Wrap the record in a shared handle.
    pub fn into_handle(self) -> SnapshotHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn to_json(&self) -> Result<String, SnapshotIoError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(input: &str) -> Result<Self, SnapshotIoError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), SnapshotIoError> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SnapshotIoError> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotIoError {
    Io(String),
    Serde(String),
}

impl From<io::Error> for SnapshotIoError {
    fn from(err: io::Error) -> Self {
        SnapshotIoError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SnapshotIoError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotIoError::Serde(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_bearing_detection() {
        let record = CellSnapshot::new_energy_bearing(100, 25);
        assert!(record.is_energy_bearing());

        let bare = CellSnapshot::default();
        assert!(!bare.is_energy_bearing());
    }

    #[test]
    fn host_fields_round_trip() {
        let input = r#"{
            "energy_capacity": 4000,
            "energy_content": { "energy": 150, "buffer_mode": "push" },
            "block_kind": "accumulator"
        }"#;
        let record = CellSnapshot::from_json(input).unwrap();
        assert_eq!(record.energy_capacity, 4000);
        assert_eq!(record.energy_content.as_ref().unwrap().energy, 150);
        assert_eq!(
            record.extra.get("block_kind"),
            Some(&Value::String("accumulator".to_string()))
        );

        let encoded = record.to_json().unwrap();
        let decoded = CellSnapshot::from_json(&encoded).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(
            decoded.energy_content.unwrap().extra.get("buffer_mode"),
            Some(&Value::String("push".to_string()))
        );
    }

    #[test]
    fn load_json_missing_file_is_io_error() {
        let err = CellSnapshot::load_json("/nonexistent/cell_snapshot.json").unwrap_err();
        assert!(matches!(err, SnapshotIoError::Io(_)));
    }
}
