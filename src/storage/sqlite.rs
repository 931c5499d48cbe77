//! SQLite realisation of [`StorageBackend`].
//!
//! Each instance owns one pooled connection manager bound to exactly one
//! backing file: either `{baseDir}/{tenant}/{database}.db` or, for an
//! isolated table, `{baseDir}/{database}/{schema}.{table}.db`. Pragmas
//! (`journal_mode`, `synchronous`, `cache_size`, `busy_timeout`,
//! `foreign_keys=ON`) are applied on every checkout via the connection
//! manager's `init` hook, matching the teacher's pattern of configuring
//! freshly-established connections once, centrally.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::errors::{Error, ErrorContext, Result};
use crate::storage::backend::{ColumnInfo, DriverTxnId, ExecResult, ResultSet, StorageBackend, Value};

/// Pragmas applied to every connection this backend hands out. Mirrors
/// spec §4.5's "configured pragmas" list.
#[derive(Debug, Clone)]
pub struct Pragmas {
    pub journal_mode: String,
    pub synchronous: String,
    pub cache_size: i64,
    pub busy_timeout_ms: u32,
    pub read_only: bool,
}

impl Default for Pragmas {
    fn default() -> Self {
        Pragmas {
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            cache_size: -2000,
            busy_timeout_ms: 5000,
            read_only: false,
        }
    }
}

pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    pragmas: Pragmas,
    next_txn_id: AtomicU64,
    // txnID -> checked-out connection holding the physical transaction
    // open, exactly as spec §5 describes ("the storage backend keeps a
    // txnID -> driverTxn map behind its own mutex").
    open_txns: Mutex<HashMap<DriverTxnId, PooledConnection<SqliteConnectionManager>>>,
}

impl SqliteBackend {
    pub fn open(path: &Path, pragmas: Pragmas, max_size: u32) -> Result<Self> {
        let pragma_sql = build_pragma_sql(&pragmas);
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.execute_batch(&pragma_sql)
        });
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .build(manager)
            .map_err(|e| Error::BadConfig(format!("failed to open sqlite pool at {path:?}: {e}")))?;
        Ok(SqliteBackend {
            pool,
            pragmas,
            next_txn_id: AtomicU64::new(1),
            open_txns: Mutex::new(HashMap::new()),
        })
    }

    fn checkout(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| Error::BadConfig(format!("sqlite pool exhausted: {e}")))
    }

    fn guard_read_only(&self, sql: &str) -> Result<()> {
        if self.pragmas.read_only && is_mutating(sql) {
            return Err(Error::IsolatedTableReadOnly {
                table: String::new(),
                ctx: ErrorContext::new(),
            });
        }
        Ok(())
    }

    fn run<F, T>(&self, txn: Option<DriverTxnId>, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        if let Some(id) = txn {
            let guard = self.open_txns.lock();
            let conn = guard.get(&id).ok_or_else(|| Error::NoTransaction {
                ctx: ErrorContext::new(),
            })?;
            f(conn).map_err(|e| sql_err(e, txn))
        } else {
            let conn = self.checkout()?;
            f(&conn).map_err(|e| sql_err(e, txn))
        }
    }
}

fn sql_err(e: rusqlite::Error, txn: Option<DriverTxnId>) -> Error {
    let mut ctx = ErrorContext::new();
    if let Some(id) = txn {
        ctx = ctx.with_txn(id);
    }
    Error::TxnFailed {
        reason: e.to_string(),
        ctx,
    }
}

fn is_mutating(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();
    upper.starts_with("INSERT")
        || upper.starts_with("UPDATE")
        || upper.starts_with("DELETE")
        || upper.starts_with("DROP")
        || upper.starts_with("ALTER")
        || upper.starts_with("CREATE")
}

fn build_pragma_sql(p: &Pragmas) -> String {
    format!(
        "PRAGMA journal_mode={}; PRAGMA synchronous={}; PRAGMA cache_size={}; PRAGMA busy_timeout={}; PRAGMA foreign_keys=ON;",
        p.journal_mode, p.synchronous, p.cache_size, p.busy_timeout_ms
    )
}

fn value_ref_to_value(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn value_to_rusqlite(v: &Value) -> rusqlite::types::Value {
    match v {
        Value::Null => rusqlite::types::Value::Null,
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
    }
}

impl StorageBackend for SqliteBackend {
    fn supports_procedures(&self) -> bool {
        false
    }

    fn query(&self, sql: &str, params: &[Value], txn: Option<DriverTxnId>) -> Result<ResultSet> {
        let bound: Vec<rusqlite::types::Value> = params.iter().map(value_to_rusqlite).collect();
        self.run(txn, |conn| {
            let mut stmt = conn.prepare(sql)?;
            let column_names: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();
            let mut rows_out = Vec::new();
            let mut rows = stmt.query(rusqlite::params_from_iter(bound.iter()))?;
            while let Some(row) = rows.next()? {
                let mut out_row = Vec::with_capacity(column_names.len());
                for i in 0..column_names.len() {
                    out_row.push(value_ref_to_value(row.get_ref(i)?));
                }
                rows_out.push(out_row);
            }
            Ok(ResultSet {
                columns: column_names
                    .into_iter()
                    .map(|name| ColumnInfo {
                        name,
                        sql_type: "nvarchar".to_string(),
                    })
                    .collect(),
                rows: rows_out,
            })
        })
    }

    fn exec(&self, sql: &str, params: &[Value], txn: Option<DriverTxnId>) -> Result<ExecResult> {
        self.guard_read_only(sql)?;
        let bound: Vec<rusqlite::types::Value> = params.iter().map(value_to_rusqlite).collect();
        self.run(txn, |conn| {
            let affected = conn.execute(sql, rusqlite::params_from_iter(bound.iter()))?;
            Ok(ExecResult {
                rows_affected: affected as u64,
                last_insert_id: Some(conn.last_insert_rowid()),
            })
        })
    }

    fn begin(&self) -> Result<DriverTxnId> {
        let conn = self.checkout()?;
        conn.execute_batch("BEGIN")
            .map_err(|e| sql_err(e, None))?;
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.open_txns.lock().insert(id, conn);
        Ok(id)
    }

    fn commit(&self, txn: DriverTxnId) -> Result<()> {
        let conn = {
            let mut guard = self.open_txns.lock();
            guard.remove(&txn)
        };
        match conn {
            Some(conn) => conn
                .execute_batch("COMMIT")
                .map_err(|e| sql_err(e, Some(txn))),
            None => Err(Error::NoTransaction {
                ctx: ErrorContext::new().with_txn(txn),
            }),
        }
    }

    fn rollback(&self, txn: DriverTxnId) -> Result<()> {
        let conn = {
            let mut guard = self.open_txns.lock();
            guard.remove(&txn)
        };
        match conn {
            Some(conn) => conn
                .execute_batch("ROLLBACK")
                .map_err(|e| sql_err(e, Some(txn))),
            None => Err(Error::NoTransaction {
                ctx: ErrorContext::new().with_txn(txn),
            }),
        }
    }
}

pub type SharedBackend = Arc<dyn StorageBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SqliteBackend {
        SqliteBackend::open(Path::new(":memory:"), Pragmas::default(), 1).unwrap()
    }

    #[test]
    fn query_and_exec_round_trip() {
        let b = backend();
        b.exec("CREATE TABLE t (id INTEGER, name TEXT)", &[], None).unwrap();
        b.exec(
            "INSERT INTO t VALUES (?1, ?2)",
            &[Value::Int(1), Value::Text("a".to_string())],
            None,
        )
        .unwrap();
        let rs = b.query("SELECT id, name FROM t", &[], None).unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0][0], Value::Int(1));
    }

    #[test]
    fn read_only_rejects_mutation() {
        let mut pragmas = Pragmas::default();
        pragmas.read_only = true;
        let b = SqliteBackend::open(Path::new(":memory:"), pragmas, 1).unwrap();
        let err = b.exec("INSERT INTO t VALUES (1)", &[], None).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::IsolatedTableReadOnly);
    }

    #[test]
    fn transaction_commit_and_rollback() {
        let b = backend();
        b.exec("CREATE TABLE t (id INTEGER)", &[], None).unwrap();
        let txn = b.begin().unwrap();
        b.exec("INSERT INTO t VALUES (1)", &[], Some(txn)).unwrap();
        b.rollback(txn).unwrap();
        let rs = b.query("SELECT id FROM t", &[], None).unwrap();
        assert_eq!(rs.rows.len(), 0);
    }

    #[test]
    fn statements_in_open_transaction_see_each_others_writes() {
        let b = backend();
        b.exec("CREATE TABLE t (id INTEGER)", &[], None).unwrap();
        let txn = b.begin().unwrap();
        b.exec("INSERT INTO t VALUES (1)", &[], Some(txn)).unwrap();
        let rs = b.query("SELECT id FROM t", &[], Some(txn)).unwrap();
        assert_eq!(rs.rows.len(), 1);
        b.commit(txn).unwrap();
    }
}
