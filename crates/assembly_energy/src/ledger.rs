//! Aggregate Ledger: per-assembly cached totals over member cells, with
//! transactional insert/extract settled at commit time.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::cell::EnergyCell;
use crate::config::EnergyConfig;
use crate::snapshot::SnapshotHandle;
use crate::transaction::{ConsistencyFault, Flow, Transaction, TxParticipant};
use crate::types::{now_unix_ms, AssemblyId, CellPos};

// ============================================================================
// Capability Seam
// ============================================================================

/// Generic energy-storage capability exposed to external transfer requesters.
pub trait EnergyStorage {
    /// Cached sum of member amounts. Always readable, even after removal.
    fn amount(&self) -> i64;
    /// Cached sum of member capacities. Always readable, even after removal.
    fn capacity(&self) -> i64;
    /// Provisionally accept up to `requested` energy inside `tx`.
    /// Returns the granted amount; the grant becomes permanent only when the
    /// enclosing transaction commits.
    fn insert(&self, requested: i64, tx: &mut Transaction) -> i64;
    /// Provisionally remove up to `requested` energy inside `tx`.
    fn extract(&self, requested: i64, tx: &mut Transaction) -> i64;
    fn supports_insertion(&self) -> bool;
    fn supports_extraction(&self) -> bool;
}

// ============================================================================
// Ledger
// ============================================================================

/// Aggregate energy ledger for one assembly.
///
/// Cheap to clone; all clones share the same state, so a handle held by an
/// external requester stays valid after the registry evicts the assembly and
/// simply fails closed.
#[derive(Clone)]
pub struct EnergyLedger {
    inner: Arc<LedgerInner>,
}

struct LedgerInner {
    assembly_id: AssemblyId,
    max_receive_per_tx: i64,
    max_extract_per_tx: i64,
    state: Mutex<LedgerState>,
}

struct LedgerState {
    amount: i64,
    capacity: i64,
    heartbeat_ms: i64,
    removed: bool,
    /// Member cells in join order. Settlement iterates this order, so the
    /// first-joined member fills and drains first.
    cells: Vec<CellEntry>,
}

struct CellEntry {
    pos: CellPos,
    cell: EnergyCell,
}

impl EnergyLedger {
    pub fn new(assembly_id: AssemblyId, config: &EnergyConfig) -> Self {
        Self::new_at(assembly_id, config, now_unix_ms())
    }

    pub fn new_at(assembly_id: AssemblyId, config: &EnergyConfig, now_ms: i64) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                assembly_id,
                max_receive_per_tx: config.max_receive_per_tx,
                max_extract_per_tx: config.max_extract_per_tx,
                state: Mutex::new(LedgerState {
                    amount: 0,
                    capacity: 0,
                    heartbeat_ms: now_ms,
                    removed: false,
                    cells: Vec::new(),
                }),
            }),
        }
    }

    pub fn assembly_id(&self) -> AssemblyId {
        self.inner.assembly_id
    }

    pub fn heartbeat_ms(&self) -> i64 {
        self.inner.state.lock().heartbeat_ms
    }

    pub fn member_count(&self) -> usize {
        self.inner.state.lock().cells.len()
    }

    /// Process one member report.
    pub fn join(&self, pos: CellPos, store: SnapshotHandle) {
        self.join_at(pos, store, now_unix_ms());
    }

    /// Process one member report at an explicit time.
    ///
    /// Every report refreshes the heartbeat, even duplicates and records
    /// without an energy section: any report proves the assembly is alive.
    pub fn join_at(&self, pos: CellPos, store: SnapshotHandle, now_ms: i64) {
        let mut state = self.inner.state.lock();
        state.heartbeat_ms = now_ms;

        if !store.lock().is_energy_bearing() {
            tracing::debug!(
                assembly = %self.inner.assembly_id,
                pos = ?pos,
                "ignoring member report without energy section"
            );
            return;
        }
        // First report wins; re-reports for a known position must not
        // double-count capacity.
        if state.cells.iter().any(|entry| entry.pos == pos) {
            tracing::debug!(
                assembly = %self.inner.assembly_id,
                pos = ?pos,
                "duplicate member report ignored"
            );
            return;
        }
        let cell = match EnergyCell::from_snapshot(store) {
            Ok(cell) => cell,
            Err(err) => {
                // The host mutated the record between the marker check and
                // the read. Treat like any non-controller report.
                tracing::debug!(
                    assembly = %self.inner.assembly_id,
                    pos = ?pos,
                    %err,
                    "ignoring unreadable member report"
                );
                return;
            }
        };
        state.amount += cell.amount();
        state.capacity += cell.capacity();
        state.cells.push(CellEntry { pos, cell });
    }

    /// Permanently disable insertion and extraction. Member records stay
    /// readable through `amount`/`capacity`.
    pub fn leave(&self) {
        self.inner.state.lock().removed = true;
    }
}

impl EnergyStorage for EnergyLedger {
    fn amount(&self) -> i64 {
        self.inner.state.lock().amount
    }

    fn capacity(&self) -> i64 {
        self.inner.state.lock().capacity
    }

    fn insert(&self, requested: i64, tx: &mut Transaction) -> i64 {
        if requested <= 0 {
            return 0;
        }
        let mut state = self.inner.state.lock();
        if state.removed {
            return 0;
        }
        let granted = (state.capacity - state.amount)
            .min(self.inner.max_receive_per_tx)
            .min(requested);
        tx.snapshot_once(self.inner.clone(), state.amount);
        state.amount += granted;
        tx.on_success(self.inner.clone(), Flow::Receive, granted);
        granted
    }

    fn extract(&self, requested: i64, tx: &mut Transaction) -> i64 {
        if requested <= 0 {
            return 0;
        }
        let mut state = self.inner.state.lock();
        if state.removed {
            return 0;
        }
        let granted = state
            .amount
            .min(self.inner.max_extract_per_tx)
            .min(requested);
        tx.snapshot_once(self.inner.clone(), state.amount);
        state.amount -= granted;
        tx.on_success(self.inner.clone(), Flow::Extract, granted);
        granted
    }

    fn supports_insertion(&self) -> bool {
        !self.inner.state.lock().removed
    }

    fn supports_extraction(&self) -> bool {
        !self.inner.state.lock().removed
    }
}

impl TxParticipant for LedgerInner {
    fn participant_id(&self) -> Uuid {
        self.assembly_id
    }

    fn restore_amount(&self, amount: i64) {
        self.state.lock().amount = amount;
    }

    fn settle(&self, flow: Flow, amount: i64) -> Result<(), ConsistencyFault> {
        let mut state = self.state.lock();
        let mut left = amount;
        for entry in state.cells.iter_mut() {
            if left <= 0 {
                break;
            }
            left -= match flow {
                Flow::Receive => entry.cell.receive(left),
                Flow::Extract => entry.cell.extract(left),
            };
        }
        if left > 0 {
            let fault = ConsistencyFault {
                assembly_id: self.assembly_id,
                flow,
                undistributed: left,
            };
            tracing::error!(%fault, "aggregate totals diverged from member records");
            return Err(fault);
        }
        Ok(())
    }
}

impl fmt::Debug for EnergyLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EnergyLedger")
            .field("assembly_id", &self.inner.assembly_id)
            .field("amount", &state.amount)
            .field("capacity", &state.capacity)
            .field("members", &state.cells.len())
            .field("removed", &state.removed)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CellSnapshot;

    fn test_config() -> EnergyConfig {
        EnergyConfig {
            max_receive_per_tx: 1000,
            max_extract_per_tx: 1000,
            ..EnergyConfig::default()
        }
    }

    fn test_ledger() -> EnergyLedger {
        EnergyLedger::new_at(Uuid::new_v4(), &test_config(), 0)
    }

    fn handle(capacity: i64, energy: i64) -> SnapshotHandle {
        CellSnapshot::new_energy_bearing(capacity, energy).into_handle()
    }

    fn persisted_energy(store: &SnapshotHandle) -> i64 {
        store.lock().energy_content.as_ref().unwrap().energy
    }

    #[test]
    fn join_aggregates_totals() {
        let ledger = test_ledger();
        ledger.join_at(CellPos::new(0, 0, 0), handle(100, 30), 1);
        ledger.join_at(CellPos::new(0, 1, 0), handle(50, 20), 2);

        assert_eq!(ledger.capacity(), 150);
        assert_eq!(ledger.amount(), 50);
        assert_eq!(ledger.member_count(), 2);
        assert_eq!(ledger.heartbeat_ms(), 2);
    }

    #[test]
    fn duplicate_join_is_noop_for_totals() {
        let ledger = test_ledger();
        let pos = CellPos::new(0, 0, 0);
        ledger.join_at(pos, handle(100, 30), 1);
        ledger.join_at(pos, handle(100, 30), 2);
        ledger.join_at(pos, handle(999, 999), 3);

        assert_eq!(ledger.capacity(), 100);
        assert_eq!(ledger.amount(), 30);
        assert_eq!(ledger.member_count(), 1);
        // Duplicates still prove liveness.
        assert_eq!(ledger.heartbeat_ms(), 3);
    }

    #[test]
    fn non_energy_report_only_refreshes_heartbeat() {
        let ledger = test_ledger();
        let bare = CellSnapshot {
            energy_capacity: 500,
            ..CellSnapshot::default()
        };
        ledger.join_at(CellPos::new(1, 2, 3), bare.into_handle(), 7);

        assert_eq!(ledger.member_count(), 0);
        assert_eq!(ledger.capacity(), 0);
        assert_eq!(ledger.heartbeat_ms(), 7);
    }

    #[test]
    fn insert_grant_is_clamped() {
        let ledger = test_ledger();
        ledger.join_at(CellPos::new(0, 0, 0), handle(100, 0), 0);

        // Clamped by request.
        let mut tx = Transaction::new();
        assert_eq!(ledger.insert(30, &mut tx), 30);
        tx.commit().unwrap();

        // Clamped by headroom.
        let mut tx = Transaction::new();
        assert_eq!(ledger.insert(500, &mut tx), 70);
        tx.commit().unwrap();
        assert_eq!(ledger.amount(), 100);

        // Clamped to zero on a full ledger.
        let mut tx = Transaction::new();
        assert_eq!(ledger.insert(1, &mut tx), 0);
    }

    #[test]
    fn insert_respects_per_tx_clamp() {
        let config = EnergyConfig {
            max_receive_per_tx: 10,
            max_extract_per_tx: 10,
            ..EnergyConfig::default()
        };
        let ledger = EnergyLedger::new_at(Uuid::new_v4(), &config, 0);
        ledger.join_at(CellPos::new(0, 0, 0), handle(100, 50), 0);

        let mut tx = Transaction::new();
        assert_eq!(ledger.insert(50, &mut tx), 10);
        assert_eq!(ledger.extract(50, &mut tx), 10);
    }

    #[test]
    fn non_positive_requests_grant_zero() {
        let ledger = test_ledger();
        ledger.join_at(CellPos::new(0, 0, 0), handle(100, 50), 0);

        let mut tx = Transaction::new();
        assert_eq!(ledger.insert(0, &mut tx), 0);
        assert_eq!(ledger.insert(-20, &mut tx), 0);
        assert_eq!(ledger.extract(0, &mut tx), 0);
        assert_eq!(ledger.extract(-20, &mut tx), 0);
        drop(tx);
        assert_eq!(ledger.amount(), 50);
    }

    #[test]
    fn committed_insert_settles_in_join_order() {
        let ledger = test_ledger();
        let first = handle(100, 0);
        let second = handle(50, 50);
        ledger.join_at(CellPos::new(0, 0, 0), first.clone(), 0);
        ledger.join_at(CellPos::new(0, 1, 0), second.clone(), 0);

        let mut tx = Transaction::new();
        let granted = ledger.insert(80, &mut tx);
        assert_eq!(granted, 80);
        // Settlement is deferred until commit.
        assert_eq!(persisted_energy(&first), 0);

        tx.commit().unwrap();
        // First-joined member takes everything it has room for.
        assert_eq!(persisted_energy(&first), 80);
        assert_eq!(persisted_energy(&second), 50);
        assert_eq!(ledger.amount(), 130);
    }

    #[test]
    fn committed_extract_settles_in_join_order() {
        let ledger = test_ledger();
        let first = handle(100, 60);
        let second = handle(50, 40);
        ledger.join_at(CellPos::new(0, 0, 0), first.clone(), 0);
        ledger.join_at(CellPos::new(0, 1, 0), second.clone(), 0);

        let mut tx = Transaction::new();
        assert_eq!(ledger.extract(75, &mut tx), 75);
        tx.commit().unwrap();

        // First-joined member drains fully before the second is touched.
        assert_eq!(persisted_energy(&first), 0);
        assert_eq!(persisted_energy(&second), 25);
        assert_eq!(ledger.amount(), 25);
    }

    #[test]
    fn aborted_insert_restores_totals_and_members() {
        let ledger = test_ledger();
        let store = handle(100, 20);
        ledger.join_at(CellPos::new(0, 0, 0), store.clone(), 0);

        let tx_amount = {
            let mut tx = Transaction::new();
            ledger.insert(50, &mut tx)
            // Dropped without commit: rollback.
        };
        assert_eq!(tx_amount, 50);
        assert_eq!(ledger.amount(), 20);
        assert_eq!(persisted_energy(&store), 20);
    }

    #[test]
    fn first_touch_snapshot_wins_within_one_scope() {
        let ledger = test_ledger();
        ledger.join_at(CellPos::new(0, 0, 0), handle(100, 10), 0);

        let mut tx = Transaction::new();
        assert_eq!(ledger.insert(30, &mut tx), 30);
        assert_eq!(ledger.insert(40, &mut tx), 40);
        assert_eq!(ledger.amount(), 80);
        drop(tx);

        // Rollback lands on the value before the first touch, not the second.
        assert_eq!(ledger.amount(), 10);
    }

    #[test]
    fn leave_disables_transfers_but_keeps_reads() {
        let ledger = test_ledger();
        ledger.join_at(CellPos::new(0, 0, 0), handle(100, 60), 0);
        ledger.leave();

        assert!(!ledger.supports_insertion());
        assert!(!ledger.supports_extraction());

        let mut tx = Transaction::new();
        assert_eq!(ledger.insert(10, &mut tx), 0);
        assert_eq!(ledger.extract(10, &mut tx), 0);
        drop(tx);

        assert_eq!(ledger.amount(), 60);
        assert_eq!(ledger.capacity(), 100);
    }

    #[test]
    fn settlement_shortfall_is_a_fault() {
        let ledger = test_ledger();
        ledger.join_at(CellPos::new(0, 0, 0), handle(100, 0), 0);

        // Corrupt the cached capacity so the grant exceeds what members can
        // actually absorb.
        ledger.inner.state.lock().capacity = 200;

        let mut tx = Transaction::new();
        assert_eq!(ledger.insert(150, &mut tx), 150);
        let fault = tx.commit().unwrap_err();
        assert_eq!(fault.flow, Flow::Receive);
        assert_eq!(fault.undistributed, 50);
        assert_eq!(fault.assembly_id, ledger.assembly_id());
    }
}
