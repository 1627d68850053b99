//! Transaction scoping for mutation calls.
//!
//! # Responsibility
//! - Give callers a single atomic query context for one service call.
//!
//! # Invariants
//! - The transaction is opened `IMMEDIATE`, so the write lock is held from the
//!   first statement. Concurrent allocations against the same database are
//!   serialized before the counter is touched.
//! - `Ok` commits, `Err` rolls back. A failed data-row write never leaves an
//!   orphaned allocation row behind.

use log::warn;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Runs `operation` inside an immediate transaction on `conn`.
///
/// The closure receives the transaction as its query context; pass it on to
/// service calls as `&tx`. The error type only needs to absorb
/// `rusqlite::Error` so begin/commit failures surface through it.
pub fn run_in_transaction<T, E, F>(conn: &mut Connection, operation: F) -> Result<T, E>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    match operation(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(
                    "event=tx_rollback module=db status=error error={}",
                    rollback_err
                );
            }
            Err(err)
        }
    }
}
