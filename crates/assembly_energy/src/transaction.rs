//! Transaction scope: provisional mutation with all-or-nothing commit.
//!
//! Participants record an undo value the first time they are touched inside
//! a scope; mutations stay provisional until `commit` runs the deferred
//! settlement actions. Dropping an uncommitted scope replays the undo log in
//! reverse and never touches a member record.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Participants
// ============================================================================

/// Direction of a deferred settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Receive,
    Extract,
}

impl Flow {
    pub fn label(&self) -> &'static str {
        match self {
            Flow::Receive => "receive",
            Flow::Extract => "extract",
        }
    }
}

/// State owner that can take part in a transaction scope.
pub(crate) trait TxParticipant: Send + Sync {
    fn participant_id(&self) -> Uuid;
    fn restore_amount(&self, amount: i64);
    fn settle(&self, flow: Flow, amount: i64) -> Result<(), ConsistencyFault>;
}

struct UndoEntry {
    owner: Uuid,
    prior_amount: i64,
    participant: Arc<dyn TxParticipant>,
}

struct SettleAction {
    participant: Arc<dyn TxParticipant>,
    flow: Flow,
    amount: i64,
}

// ============================================================================
// Transaction
// ============================================================================

/// A scoped unit of provisional mutation.
///
/// The caller decides the fate: `commit` makes the provisional state
/// permanent and settles member records; dropping the scope (or calling
/// `abort`) rolls everything back.
pub struct Transaction {
    undo: Vec<UndoEntry>,
    on_success: Vec<SettleAction>,
    committed: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            undo: Vec::new(),
            on_success: Vec::new(),
            committed: false,
        }
    }

    /// Record the undo value for a participant. First write wins: later
    /// touches by the same owner inside this scope keep the original
    /// rollback point.
    pub(crate) fn snapshot_once(&mut self, participant: Arc<dyn TxParticipant>, amount: i64) {
        let owner = participant.participant_id();
        if self.undo.iter().any(|entry| entry.owner == owner) {
            return;
        }
        self.undo.push(UndoEntry {
            owner,
            prior_amount: amount,
            participant,
        });
    }

    /// Register a settlement to run if this scope commits.
    pub(crate) fn on_success(&mut self, participant: Arc<dyn TxParticipant>, flow: Flow, amount: i64) {
        self.on_success.push(SettleAction {
            participant,
            flow,
            amount,
        });
    }

    /// Make the provisional state permanent and settle member records in
    /// registration order.
    ///
    /// A `ConsistencyFault` here means cached totals diverged from member
    /// records. The provisional state is NOT rolled back in that case: the
    /// bookkeeping is already broken and an undo replay would only fabricate
    /// agreement.
    pub fn commit(mut self) -> Result<(), ConsistencyFault> {
        self.committed = true;
        self.undo.clear();
        let actions = std::mem::take(&mut self.on_success);
        for action in actions {
            action.participant.settle(action.flow, action.amount)?;
        }
        Ok(())
    }

    /// Roll back explicitly. Equivalent to dropping the scope.
    pub fn abort(self) {}

    fn rollback(&mut self) {
        while let Some(entry) = self.undo.pop() {
            entry.participant.restore_amount(entry.prior_amount);
        }
        self.on_success.clear();
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Commit-time settlement could not place the full granted amount across
/// member records. Signals a broken invariant, never ordinary exhaustion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyFault {
    pub assembly_id: Uuid,
    pub flow: Flow,
    pub undistributed: i64,
}

impl fmt::Display for ConsistencyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "energy settlement shortfall on assembly {}: {} left undistributed during {}",
            self.assembly_id,
            self.undistributed,
            self.flow.label()
        )
    }
}

impl Error for ConsistencyFault {}
