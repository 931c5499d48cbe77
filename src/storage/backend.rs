//! `StorageBackend`: the ABI surface a storage engine implements.
//!
//! SQLite is the only implementation today ("SQLite today; PostgreSQL
//! planned" — §1); the trait is the seam a future `tokio-postgres`-backed
//! implementation plugs into. Row/value types are re-exported from
//! `aul-jit-abi` rather than redefined here: a compiled JIT plugin hands
//! back an `ExecResult` built against that crate, and the host must accept
//! it without a conversion step, so the host's own storage layer speaks
//! the same types rather than a parallel copy of them.

pub use aul_jit_abi::{ColumnInfo, ExecResult, ResultSet, Value};

use crate::errors::{Error, ErrorContext, Result};

/// An opaque handle to a backend-native transaction, keyed so the runtime
/// can correlate `BEGIN`/`COMMIT`/`ROLLBACK` calls with the physical
/// driver transaction without owning it directly.
pub type DriverTxnId = u64;

/// The contract every storage engine implements. One instance is bound
/// to one physical backing file (a `(tenant, database)` pair, or an
/// isolated table's own file); the router (`storage::router`) decides
/// which instance a statement goes to.
pub trait StorageBackend: Send + Sync {
    /// Whether this backend can execute a named procedure natively,
    /// bypassing interpretation (see glossary: "Delegation"). SQLite has
    /// no native stored procedures, so the SQLite backend always answers
    /// `false`.
    fn supports_procedures(&self) -> bool {
        false
    }

    /// `txn`, when set, pins the statement to the connection holding that
    /// open transaction instead of a fresh pool checkout, so statements
    /// issued between `BEGIN` and `COMMIT`/`ROLLBACK` observe each
    /// other's uncommitted writes.
    fn query(&self, sql: &str, params: &[Value], txn: Option<DriverTxnId>) -> Result<ResultSet>;

    fn exec(&self, sql: &str, params: &[Value], txn: Option<DriverTxnId>) -> Result<ExecResult>;

    /// Delegate a procedure call to a backend that implements it
    /// natively. Returns `NotImplemented` unless `supports_procedures()`
    /// is `true`.
    fn call_delegated(
        &self,
        name: &str,
        _params: &[Value],
        _txn: Option<DriverTxnId>,
    ) -> Result<ExecResult> {
        Err(Error::NotImplemented {
            what: format!("delegated call to {name}"),
            ctx: ErrorContext::new(),
        })
    }

    fn begin(&self) -> Result<DriverTxnId>;
    fn commit(&self, txn: DriverTxnId) -> Result<()>;
    fn rollback(&self, txn: DriverTxnId) -> Result<()>;
}
