//! Tenant-aware storage layer and query router (C5).

pub mod backend;
pub mod catalog;
pub mod isolated;
pub mod router;
pub mod sqlite;
pub mod tenant;

pub use backend::{ColumnInfo, DriverTxnId, ExecResult, ResultSet, StorageBackend, Value};
pub use catalog::{ObjectIdAllocator, SystemCatalog};
pub use isolated::{ColumnMeta, IsolatedTableCatalog, TableMetadata};
pub use router::{route, RouteTarget, TableRef};
pub use sqlite::{Pragmas, SqliteBackend};
pub use tenant::{sanitize_segment, TenantPools, TenantStorageConfig, DEFAULT_TENANT};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::Result;
use crate::registry::ProcedureRegistry;

/// Identifies one isolated table's backing file, the same way
/// `tenant::TenantDbKey` identifies one tenant database's.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct IsolatedBackendKey {
    database: String,
    schema: String,
    name: String,
}

/// Ties the tenant pool, isolated-table catalog, and system-catalog
/// synthesiser together into the one entry point the execution runtime
/// calls to resolve "where does this statement run".
pub struct StorageLayer {
    pub tenants: TenantPools,
    pub isolated: IsolatedTableCatalog,
    pub object_ids: ObjectIdAllocator,
    /// Lazily-opened, memoised pool of per-isolated-table backends,
    /// mirroring `TenantPools::get_or_open` (one backend instance per
    /// backing file, never reopened on every statement).
    isolated_backends: RwLock<HashMap<IsolatedBackendKey, Arc<SqliteBackend>>>,
}

impl StorageLayer {
    pub fn new(config: TenantStorageConfig) -> Self {
        StorageLayer {
            tenants: TenantPools::new(config),
            isolated: IsolatedTableCatalog::new(),
            object_ids: ObjectIdAllocator::new(),
            isolated_backends: RwLock::new(HashMap::new()),
        }
    }

    /// Fast read path, then a double-checked write path that opens the
    /// isolated table's backend at most once per `(database, schema,
    /// name)` key — the same memoisation `TenantPools::get_or_open` does
    /// for tenant databases.
    fn get_or_open_isolated(&self, database: &str, schema: &str, name: &str) -> Result<Arc<SqliteBackend>> {
        let key = IsolatedBackendKey {
            database: database.to_string(),
            schema: schema.to_string(),
            name: name.to_string(),
        };

        if let Some(backend) = self.isolated_backends.read().get(&key) {
            return Ok(backend.clone());
        }

        let mut write_guard = self.isolated_backends.write();
        if let Some(backend) = write_guard.get(&key) {
            return Ok(backend.clone());
        }

        let path = self.tenants.isolated_table_path(database, schema, name);
        let meta = self.isolated.get(database, schema, name);
        let pragmas = meta
            .map(|m| {
                let mut p = Pragmas::default();
                p.read_only = m.is_read_only();
                p
            })
            .unwrap_or_default();
        let backend = Arc::new(SqliteBackend::open(&path, pragmas, 4)?);
        write_guard.insert(key, backend.clone());
        Ok(backend)
    }

    /// Resolve a backend for the given statement against the given
    /// tenant/database, running system-catalog interception and routing
    /// in the order spec §4.5 mandates: catalog first, router second.
    pub fn backend_for_statement(
        &self,
        tenant: &str,
        database: &str,
        sql: &str,
        registry: &ProcedureRegistry,
    ) -> Result<StatementTarget> {
        if catalog::is_system_catalog_query(sql) {
            let main = self.tenants.get_or_open(tenant, database)?;
            let table_names = list_sqlite_master_tables(&main)?;
            let sys = SystemCatalog {
                isolated: &self.isolated,
                registry,
                ids: &self.object_ids,
            };
            if let Some(result) = sys.answer(sql, database, &table_names) {
                return Ok(StatementTarget::SystemCatalog(result));
            }
        }

        match router::route(database, sql, &self.isolated)? {
            RouteTarget::Main => {
                Ok(StatementTarget::Backend(self.tenants.get_or_open(tenant, database)?))
            }
            RouteTarget::Isolated(table_ref) => Ok(StatementTarget::Backend(self.get_or_open_isolated(
                database,
                &table_ref.schema,
                &table_ref.name,
            )?)),
        }
    }
}

pub enum StatementTarget {
    Backend(Arc<SqliteBackend>),
    SystemCatalog(ResultSet),
}

fn list_sqlite_master_tables(backend: &SqliteBackend) -> Result<Vec<String>> {
    let rs = backend.query(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        &[],
        None,
    )?;
    Ok(rs
        .rows
        .into_iter()
        .filter_map(|mut row| row.pop())
        .map(|v| match v {
            Value::Text(s) => s,
            other => value_to_display_string(&other),
        })
        .collect())
}

/// `aul_jit_abi::Value` carries no `Display` impl (the ABI crate stays
/// free of host-only convenience code), so table names that somehow
/// aren't `TEXT` fall back to this local formatter.
fn value_to_display_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("{b:?}"),
        Value::Bool(b) => b.to_string(),
    }
}
