//! Isolated-table metadata and lifecycle.
//!
//! A table with the `isolated` annotation lives in its own file at
//! `{baseDir}/{database}/{schema}.{table}.db` instead of the tenant's
//! main database file.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::annotation::AnnotationSet;
use crate::errors::Result;
use crate::storage::backend::StorageBackend;
use crate::storage::sqlite::{Pragmas, SqliteBackend};
use crate::storage::tenant::TenantPools;

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub sql_type: String,
}

/// `{database, schema, name, annotations, columns[], createdAt, modifiedAt}`.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub database: String,
    pub schema: String,
    pub name: String,
    pub annotations: AnnotationSet,
    pub columns: Vec<ColumnMeta>,
    pub created_at: i64,
    pub modified_at: i64,
}

impl TableMetadata {
    pub fn is_isolated(&self) -> bool {
        self.annotations.get_bool("isolated")
    }

    pub fn is_read_only(&self) -> bool {
        self.annotations.get_bool("read-only")
    }

    fn pragmas(&self) -> Pragmas {
        let mut p = Pragmas::default();
        if self.annotations.contains_key("journal-mode") {
            p.journal_mode = self.annotations.get_string("journal-mode", &p.journal_mode);
        }
        if self.annotations.contains_key("synchronous") {
            p.synchronous = self.annotations.get_string("synchronous", &p.synchronous);
        }
        if self.annotations.contains_key("cache-size") {
            p.cache_size = self.annotations.get_int("cache-size", p.cache_size);
        }
        p.read_only = self.is_read_only();
        p
    }
}

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct TableKey {
    database: String,
    schema: String,
    name: String,
}

/// The metadata catalogue: owns [`TableMetadata`]; the storage router
/// consults it read-only.
pub struct IsolatedTableCatalog {
    entries: RwLock<HashMap<TableKey, TableMetadata>>,
}

impl IsolatedTableCatalog {
    pub fn new() -> Self {
        IsolatedTableCatalog {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_isolated(&self, database: &str, schema: &str, table: &str) -> bool {
        let key = TableKey {
            database: database.to_string(),
            schema: schema.to_string(),
            name: table.to_string(),
        };
        self.entries
            .read()
            .get(&key)
            .map(TableMetadata::is_isolated)
            .unwrap_or(false)
    }

    pub fn get(&self, database: &str, schema: &str, table: &str) -> Option<TableMetadata> {
        let key = TableKey {
            database: database.to_string(),
            schema: schema.to_string(),
            name: table.to_string(),
        };
        self.entries.read().get(&key).cloned()
    }

    pub fn register(&self, meta: TableMetadata) {
        let key = TableKey {
            database: meta.database.clone(),
            schema: meta.schema.clone(),
            name: meta.name.clone(),
        };
        self.entries.write().insert(key, meta);
    }

    pub fn unregister(&self, database: &str, schema: &str, table: &str) -> Option<TableMetadata> {
        let key = TableKey {
            database: database.to_string(),
            schema: schema.to_string(),
            name: table.to_string(),
        };
        self.entries.write().remove(&key)
    }

    pub fn all(&self) -> Vec<TableMetadata> {
        self.entries.read().values().cloned().collect()
    }
}

impl Default for IsolatedTableCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates an isolated table's dedicated backing file and registers its
/// metadata. `ddl` must already have annotation comments stripped.
pub fn create_isolated_table(
    pools: &TenantPools,
    catalog: &IsolatedTableCatalog,
    database: &str,
    schema: &str,
    table: &str,
    annotations: AnnotationSet,
    columns: Vec<ColumnMeta>,
    ddl: &str,
    now: i64,
) -> Result<Arc<SqliteBackend>> {
    let path = pools.isolated_table_path(database, schema, table);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let meta = TableMetadata {
        database: database.to_string(),
        schema: schema.to_string(),
        name: table.to_string(),
        annotations,
        columns,
        created_at: now,
        modified_at: now,
    };
    let backend = Arc::new(SqliteBackend::open(&path, meta.pragmas(), 4)?);
    backend.exec(ddl, &[], None)?;
    catalog.register(meta);
    Ok(backend)
}

/// Drops an isolated table: closes the pool (by dropping the last
/// reference the caller holds), removes the `.db` file and its
/// `-wal`/`-shm` sidecars, and unregisters the metadata.
pub fn drop_isolated_table(
    pools: &TenantPools,
    catalog: &IsolatedTableCatalog,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<()> {
    let path = pools.isolated_table_path(database, schema, table);
    catalog.unregister(database, schema, table);
    for suffix in ["", "-wal", "-shm"] {
        let sidecar = if suffix.is_empty() {
            path.clone()
        } else {
            let mut s = path.clone().into_os_string();
            s.push(suffix);
            s.into()
        };
        let _ = std::fs::remove_file(sidecar);
    }
    Ok(())
}

/// Strip `-- @aul:...` annotation lines from a `CREATE TABLE` statement
/// before it is sent to the backend, per spec §4.5.
pub fn strip_annotation_comments(ddl: &str) -> String {
    ddl.lines()
        .filter(|line| !line.trim_start().starts_with("-- @aul:"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tenant::TenantStorageConfig;
    use tempfile::tempdir;

    #[test]
    fn strips_annotation_lines_only() {
        let ddl = "-- @aul:isolated\nCREATE TABLE t (\n  id INT -- a normal comment\n);\n";
        let stripped = strip_annotation_comments(ddl);
        assert!(!stripped.contains("@aul"));
        assert!(stripped.contains("a normal comment"));
    }

    #[test]
    fn create_and_drop_isolated_table() {
        let dir = tempdir().unwrap();
        let pools = TenantPools::new(TenantStorageConfig {
            base_dir: dir.path().to_path_buf(),
            auto_create: true,
            pragmas: Pragmas::default(),
            pool_size: 2,
        });
        let catalog = IsolatedTableCatalog::new();
        let (set, _) = AnnotationSet::from_pairs(vec![("isolated".to_string(), String::new())]);
        create_isolated_table(
            &pools,
            &catalog,
            "master",
            "dbo",
            "AuditLog",
            set,
            vec![],
            "CREATE TABLE AuditLog (id INTEGER)",
            0,
        )
        .unwrap();
        assert!(catalog.is_isolated("master", "dbo", "AuditLog"));
        let path = pools.isolated_table_path("master", "dbo", "AuditLog");
        assert!(path.exists());
        drop_isolated_table(&pools, &catalog, "master", "dbo", "AuditLog").unwrap();
        assert!(!catalog.is_isolated("master", "dbo", "AuditLog"));
        assert!(!path.exists());
    }
}
