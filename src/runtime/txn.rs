//! Transaction nesting semantics (spec §4.3): `BEGIN` increments,
//! `COMMIT` decrements but only closes the underlying transaction on
//! 1→0, `ROLLBACK` always collapses to 0.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{Error, ErrorContext, Result};
use crate::runtime::context::{ExecContext, TransactionContext, TxnState};
use crate::storage::StorageBackend;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `BEGIN`: create on 0→1, otherwise just increment the nesting counter.
/// A session holds at most one active transaction context.
pub fn begin(ctx: &mut ExecContext, backend: &dyn StorageBackend) -> Result<()> {
    match &mut ctx.txn {
        Some(txn) => {
            txn.nesting_level += 1;
            Ok(())
        }
        None => {
            let driver_txn = backend.begin()?;
            ctx.txn = Some(TransactionContext {
                id: NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst),
                start_time: now_unix(),
                nesting_level: 1,
                savepoints: Vec::new(),
                state: TxnState::Active,
                driver_txn,
            });
            Ok(())
        }
    }
}

/// `COMMIT`: decrement, closing the underlying transaction only when the
/// nesting counter reaches zero. `COMMIT` with no active transaction is
/// `ErrNoTransaction`.
pub fn commit(ctx: &mut ExecContext, backend: &dyn StorageBackend) -> Result<()> {
    let txn = ctx.txn.as_mut().ok_or_else(|| Error::NoTransaction {
        ctx: ErrorContext::new(),
    })?;
    txn.nesting_level -= 1;
    if txn.nesting_level == 0 {
        let driver_txn = txn.driver_txn;
        backend.commit(driver_txn)?;
        if let Some(txn) = ctx.txn.as_mut() {
            txn.state = TxnState::Committed;
        }
        ctx.txn = None;
    }
    Ok(())
}

/// `ROLLBACK`: always collapses nesting to zero and invokes the backend
/// rollback, regardless of how deeply nested the session's `BEGIN`s were.
pub fn rollback(ctx: &mut ExecContext, backend: &dyn StorageBackend) -> Result<()> {
    let txn = ctx.txn.take().ok_or_else(|| Error::NoTransaction {
        ctx: ErrorContext::new(),
    })?;
    backend.rollback(txn.driver_txn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::ExecContext;
    use crate::storage::sqlite::{Pragmas, SqliteBackend};
    use std::path::Path;

    fn ctx() -> ExecContext {
        ExecContext::new(1, "master", "sa")
    }

    fn backend() -> SqliteBackend {
        SqliteBackend::open(Path::new(":memory:"), Pragmas::default(), 1).unwrap()
    }

    #[test]
    fn nested_begin_commit_only_closes_at_one_to_zero() {
        let b = backend();
        let mut c = ctx();
        begin(&mut c, &b).unwrap();
        begin(&mut c, &b).unwrap();
        assert_eq!(c.txn.as_ref().unwrap().nesting_level, 2);
        commit(&mut c, &b).unwrap();
        assert!(c.in_txn(), "still open after one commit of two begins");
        commit(&mut c, &b).unwrap();
        assert!(!c.in_txn());
    }

    #[test]
    fn rollback_collapses_any_nesting_in_one_step() {
        let b = backend();
        let mut c = ctx();
        begin(&mut c, &b).unwrap();
        begin(&mut c, &b).unwrap();
        begin(&mut c, &b).unwrap();
        rollback(&mut c, &b).unwrap();
        assert!(!c.in_txn());
    }

    #[test]
    fn commit_without_transaction_errors() {
        let b = backend();
        let mut c = ctx();
        let err = commit(&mut c, &b).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::NoTransaction);
    }
}
