// ============================================================================
// Transaction State Management
// ============================================================================
//
// A transaction moves Active -> Committed or Active -> Aborted and buffers
// its changes until then. Reads inside the transaction consult the buffer
// first so a session sees its own uncommitted writes.
//
// ============================================================================

use super::Change;
use crate::core::{DbError, Result, Row, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// What a transaction's buffer says about one row.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingRow {
    Inserted(Row),
    Deleted,
}

#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    changes: Vec<Change>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            changes: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn record(&mut self, change: Change) -> Result<()> {
        self.ensure_active()?;
        self.changes.push(change);
        Ok(())
    }

    /// The latest buffered state of `table`/`id`, if this transaction touched it.
    pub fn pending_row(&self, table: &str, id: i64) -> Option<PendingRow> {
        self.changes
            .iter()
            .rev()
            .find(|c| c.table_name() == table && c.id() == id)
            .map(|c| match c {
                Change::InsertRow { row, .. } => PendingRow::Inserted(row.clone()),
                Change::DeleteRow { .. } => PendingRow::Deleted,
            })
    }

    /// Buffered rows of `table` whose column `column_idx` equals `value`,
    /// excluding rows later deleted in this transaction.
    pub fn pending_matches(&self, table: &str, column_idx: usize, value: &Value) -> Vec<Row> {
        self.changes
            .iter()
            .filter_map(|c| match c {
                Change::InsertRow { table: t, id, row }
                    if t == table && row.get(column_idx) == Some(value) =>
                {
                    Some((*id, row))
                }
                _ => None,
            })
            .filter(|(id, _)| matches!(self.pending_row(table, *id), Some(PendingRow::Inserted(_))))
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Marks the transaction committed and hands back its buffered changes.
    pub fn commit(&mut self) -> Result<Vec<Change>> {
        self.ensure_active()?;
        self.state = TransactionState::Committed;
        Ok(std::mem::take(&mut self.changes))
    }

    /// Marks the transaction aborted and discards its buffered changes.
    pub fn rollback(&mut self) -> Result<usize> {
        self.ensure_active()?;
        self.state = TransactionState::Aborted;
        let discarded = self.changes.len();
        self.changes.clear();
        Ok(discarded)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(DbError::TransactionError(format!(
                "Transaction {} is {:?}",
                self.id, self.state
            )))
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}
