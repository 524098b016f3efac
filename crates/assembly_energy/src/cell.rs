//! Cell Record: one member component's exposed energy state, write-through
//! persisted to its durable snapshot record.

use std::error::Error;
use std::fmt;

use crate::snapshot::{EnergyContent, SnapshotHandle};

/// Energy state of a single member component.
///
/// Capacity is fixed at construction; the amount is the only thing that ever
/// changes, and every non-zero change is written back to the shared snapshot
/// record so the host persists it.
#[derive(Debug, Clone)]
pub struct EnergyCell {
    capacity: i64,
    amount: i64,
    store: SnapshotHandle,
}

impl EnergyCell {
    /// Read a cell out of a durable snapshot record.
    pub fn from_snapshot(store: SnapshotHandle) -> Result<Self, InvalidRecordError> {
        let (capacity, amount) = {
            let record = store.lock();
            let content = record
                .energy_content
                .as_ref()
                .ok_or(InvalidRecordError::MissingEnergyContent)?;
            (record.energy_capacity, content.energy)
        };
        Ok(Self {
            capacity,
            amount,
            store,
        })
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Accept up to `amount` energy, clamped to remaining headroom.
    /// Returns the amount actually accepted.
    pub fn receive(&mut self, amount: i64) -> i64 {
        if amount <= 0 {
            return 0;
        }
        let accepted = (self.capacity - self.amount).min(amount);
        if accepted == 0 {
            // Nothing changed, skip the write. Performance only; callers
            // must not rely on the skip.
            return 0;
        }
        self.amount += accepted;
        self.write_through();
        accepted
    }

    /// Remove up to `amount` energy, clamped to the stored amount.
    /// Returns the amount actually removed.
    pub fn extract(&mut self, amount: i64) -> i64 {
        if amount <= 0 {
            return 0;
        }
        let removed = self.amount.min(amount);
        if removed == 0 {
            return 0;
        }
        self.amount -= removed;
        self.write_through();
        removed
    }

    fn write_through(&self) {
        let mut record = self.store.lock();
        match record.energy_content.as_mut() {
            Some(content) => content.energy = self.amount,
            None => {
                record.energy_content = Some(EnergyContent {
                    energy: self.amount,
                    extra: serde_json::Map::new(),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRecordError {
    MissingEnergyContent,
}

impl fmt::Display for InvalidRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidRecordError::MissingEnergyContent => {
                write!(f, "snapshot record has no energy content section")
            }
        }
    }
}

impl Error for InvalidRecordError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CellSnapshot;

    #[test]
    fn from_snapshot_requires_energy_content() {
        let bare = CellSnapshot {
            energy_capacity: 500,
            ..CellSnapshot::default()
        };
        let err = EnergyCell::from_snapshot(bare.into_handle()).unwrap_err();
        assert_eq!(err, InvalidRecordError::MissingEnergyContent);
    }

    #[test]
    fn receive_clamps_and_persists() {
        let handle = CellSnapshot::new_energy_bearing(100, 40).into_handle();
        let mut cell = EnergyCell::from_snapshot(handle.clone()).unwrap();

        assert_eq!(cell.receive(25), 25);
        assert_eq!(cell.amount(), 65);
        assert_eq!(handle.lock().energy_content.as_ref().unwrap().energy, 65);

        // Over-ask clamps to headroom.
        assert_eq!(cell.receive(1000), 35);
        assert_eq!(cell.amount(), 100);
        assert_eq!(handle.lock().energy_content.as_ref().unwrap().energy, 100);

        // Full cell accepts nothing.
        assert_eq!(cell.receive(1), 0);
        assert_eq!(cell.amount(), 100);
    }

    #[test]
    fn extract_clamps_and_persists() {
        let handle = CellSnapshot::new_energy_bearing(100, 40).into_handle();
        let mut cell = EnergyCell::from_snapshot(handle.clone()).unwrap();

        assert_eq!(cell.extract(15), 15);
        assert_eq!(cell.amount(), 25);
        assert_eq!(handle.lock().energy_content.as_ref().unwrap().energy, 25);

        assert_eq!(cell.extract(1000), 25);
        assert_eq!(cell.amount(), 0);
        assert_eq!(cell.extract(1), 0);
    }

    #[test]
    fn non_positive_transfer_is_noop() {
        let handle = CellSnapshot::new_energy_bearing(100, 40).into_handle();
        let mut cell = EnergyCell::from_snapshot(handle).unwrap();
        assert_eq!(cell.receive(0), 0);
        assert_eq!(cell.receive(-5), 0);
        assert_eq!(cell.extract(0), 0);
        assert_eq!(cell.extract(-5), 0);
        assert_eq!(cell.amount(), 40);
    }
}
