//! Assembly Registry: process-wide concurrent map from assembly identity to
//! its aggregate ledger, with a heartbeat sweep for assemblies that vanish
//! without a departure signal.

use dashmap::DashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::config::EnergyConfig;
use crate::ledger::EnergyLedger;
use crate::snapshot::SnapshotHandle;
use crate::types::{now_unix_ms, AssemblyId, CellPos};

static GLOBAL: OnceLock<AssemblyRegistry> = OnceLock::new();

pub struct AssemblyRegistry {
    assemblies: DashMap<AssemblyId, EnergyLedger>,
    config: EnergyConfig,
}

impl AssemblyRegistry {
    pub fn new(config: EnergyConfig) -> Self {
        Self {
            assemblies: DashMap::new(),
            config,
        }
    }

    /// Process-wide registry with default configuration. Hosts that load
    /// their own configuration should construct and own a registry instead.
    pub fn global() -> &'static AssemblyRegistry {
        GLOBAL.get_or_init(|| AssemblyRegistry::new(EnergyConfig::default()))
    }

    pub fn len(&self) -> usize {
        self.assemblies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
    }

    /// Periodic sweep: evict assemblies whose last report is older than the
    /// heartbeat timeout.
    ///
    /// There is no reliable signal for an assembly that disappears, so this
    /// is a conservative liveness timeout rather than immediate removal. A
    /// report racing the sweep may land on either side of the eviction;
    /// either outcome is acceptable.
    pub fn tick(&self) {
        self.sweep_at(now_unix_ms());
    }

    /// Sweep with an explicit notion of "now".
    pub fn sweep_at(&self, now_ms: i64) {
        let timeout = self.config.heartbeat_timeout_ms;
        self.assemblies.retain(|assembly_id, ledger| {
            let alive = now_ms.saturating_sub(ledger.heartbeat_ms()) <= timeout;
            if !alive {
                tracing::info!(
                    assembly = %assembly_id,
                    "evicting assembly after heartbeat timeout"
                );
            }
            alive
        });
    }

    /// Member-report callback: called once per tracked component per driver
    /// cycle while the assembly is active.
    pub fn report_member(&self, assembly: AssemblyId, pos: CellPos, store: SnapshotHandle) {
        self.report_member_at(assembly, pos, store, now_unix_ms());
    }

    pub fn report_member_at(
        &self,
        assembly: AssemblyId,
        pos: CellPos,
        store: SnapshotHandle,
        now_ms: i64,
    ) {
        let ledger = {
            let entry = self
                .assemblies
                .entry(assembly)
                .or_insert_with(|| EnergyLedger::new_at(assembly, &self.config, now_ms));
            entry.value().clone()
        };
        // The shard lock is released before the join so readers of other
        // entries never wait on member bookkeeping.
        ledger.join_at(pos, store, now_ms);
    }

    /// Departure callback: the driver knows the assembly was disbanded.
    /// The ledger is marked removed so transactions already holding a stale
    /// reference fail closed instead of silently succeeding.
    pub fn report_departure(&self, assembly: AssemblyId) {
        if let Some((_, ledger)) = self.assemblies.remove(&assembly) {
            ledger.leave();
            tracing::info!(assembly = %assembly, "assembly departed");
        }
    }

    pub fn lookup(&self, assembly: AssemblyId) -> Option<EnergyLedger> {
        self.assemblies
            .get(&assembly)
            .map(|entry| entry.value().clone())
    }

    /// Lookup boundary for external energy-transfer requesters. `None`
    /// identity (the assembly is not resolvable at call time) yields `None`.
    pub fn resolve_energy_interface(&self, assembly: Option<AssemblyId>) -> Option<EnergyLedger> {
        self.lookup(assembly?)
    }
}

impl fmt::Debug for AssemblyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssemblyRegistry")
            .field("tracked_assemblies", &self.assemblies.len())
            .field("config", &self.config)
            .finish()
    }
}
