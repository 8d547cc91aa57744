// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Unit-of-work transactions for a persistence session:
// - State Pattern: Active -> Committed / Aborted
// - Command Pattern: buffered, reversible changes applied at commit
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{PendingRow, Transaction, TransactionId, TransactionState};
