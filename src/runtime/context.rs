//! Per-call execution context and the transaction state it carries.

use std::collections::HashMap;
use std::time::Duration;

use crate::storage::Value;

/// Depth limit for nested `EXEC` calls (spec §4.3: "depth > 32 →
/// `ErrNestingLimitExceeded`").
pub const MAX_NESTING_LEVEL: u32 = 32;

/// `{sessionID, database, tenant, principal, parameters, timeout, inTxn,
/// txnContext, nestingLevel}`. One instance is created per top-level
/// client request and threaded by mutable reference through every nested
/// `EXEC`; `nesting_level` and `txn` are the only fields that change
/// across a nested call's lifetime.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub session_id: u64,
    pub database: String,
    pub tenant: Option<String>,
    pub principal: String,
    pub parameters: HashMap<String, Value>,
    pub timeout: Duration,
    pub txn: Option<TransactionContext>,
    pub nesting_level: u32,
}

impl ExecContext {
    pub fn new(session_id: u64, database: impl Into<String>, principal: impl Into<String>) -> Self {
        ExecContext {
            session_id,
            database: database.into(),
            tenant: None,
            principal: principal.into(),
            parameters: HashMap::new(),
            timeout: Duration::from_secs(30),
            txn: None,
            nesting_level: 0,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn in_txn(&self) -> bool {
        self.txn.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    RolledBack,
}

/// `{id, startTime, nestingLevel, savepoints[], state}`. `nesting_level`
/// here counts `BEGIN`/`COMMIT` pairs (spec §4.3), unrelated to
/// [`ExecContext::nesting_level`]'s `EXEC` call depth.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub id: u64,
    pub start_time: i64,
    pub nesting_level: u32,
    pub savepoints: Vec<String>,
    pub state: TxnState,
    pub(crate) driver_txn: crate::storage::DriverTxnId,
}

/// What an `Execute` call produced: zero or more result sets (one per
/// `SELECT`), the affected-row count of the last DML statement, and any
/// values bound to `OUTPUT` parameters declared by the procedure.
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    pub result_sets: Vec<crate::storage::ResultSet>,
    pub rows_affected: u64,
    pub output_params: HashMap<String, Value>,
}
