//! Per-tenant file layout and lazily-opened connection pools.
//!
//! `{baseDir}/{tenant}/{database}.db`, `_default` tenant as fallback.
//! Mirrors the teacher's `pool::POOLS` idiom (a map guarded by a
//! reader-preferred lock, double-checked on the writer path for lazy
//! creation) but keyed by `(tenant, database)` instead of `(db, user)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{Error, Result};
use crate::storage::sqlite::{Pragmas, SqliteBackend};

pub const DEFAULT_TENANT: &str = "_default";

/// Replace `/`, `\`, and `..` with `_`. Applied to every tenant and
/// database name before it reaches the filesystem — the mechanism behind
/// the path-traversal invariant: `QueryForTenant(t, d, ..)` can only ever
/// touch files under `{baseDir}/{t}/*`.
pub fn sanitize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '/' | '\\' => out.push('_'),
            '.' if chars.peek() == Some(&'.') => {
                out.push('_');
                out.push('_');
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct TenantStorageConfig {
    pub base_dir: PathBuf,
    pub auto_create: bool,
    pub pragmas: Pragmas,
    pub pool_size: u32,
}

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct TenantDbKey {
    tenant: String,
    database: String,
}

/// Lazily-opened, memoised pool of per-tenant SQLite backends.
pub struct TenantPools {
    config: TenantStorageConfig,
    pools: RwLock<HashMap<TenantDbKey, Arc<SqliteBackend>>>,
}

impl TenantPools {
    pub fn new(config: TenantStorageConfig) -> Self {
        TenantPools {
            config,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, tenant: &str, database: &str) -> PathBuf {
        let tenant = sanitize_segment(if tenant.is_empty() { DEFAULT_TENANT } else { tenant });
        let database = sanitize_segment(database);
        self.config.base_dir.join(tenant).join(format!("{database}.db"))
    }

    /// Fast read path, then a double-checked write path that opens the
    /// backend at most once per `(tenant, database)` key.
    pub fn get_or_open(&self, tenant: &str, database: &str) -> Result<Arc<SqliteBackend>> {
        let key = TenantDbKey {
            tenant: if tenant.is_empty() { DEFAULT_TENANT.to_string() } else { tenant.to_string() },
            database: database.to_string(),
        };

        if let Some(backend) = self.pools.read().get(&key) {
            return Ok(backend.clone());
        }

        let mut write_guard = self.pools.write();
        if let Some(backend) = write_guard.get(&key) {
            return Ok(backend.clone());
        }

        let path = self.path_for(&key.tenant, &key.database);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !path.exists() && !self.config.auto_create {
            return Err(Error::BadConfig(format!(
                "database file {path:?} does not exist and autoCreate is disabled"
            )));
        }
        let backend = Arc::new(SqliteBackend::open(
            &path,
            self.config.pragmas.clone(),
            self.config.pool_size,
        )?);
        write_guard.insert(key, backend.clone());
        Ok(backend)
    }

    pub fn isolated_table_path(&self, database: &str, schema: &str, table: &str) -> PathBuf {
        let database = sanitize_segment(database);
        let schema = sanitize_segment(schema);
        let table = sanitize_segment(table);
        self.config
            .base_dir
            .join(database)
            .join(format!("{schema}.{table}.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitizes_path_traversal() {
        assert_eq!(sanitize_segment("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_segment("alpha"), "alpha");
        assert_eq!(sanitize_segment("a/../b"), "a___b");
    }

    #[test]
    fn path_for_stays_under_base_dir() {
        let dir = tempdir().unwrap();
        let pools = TenantPools::new(TenantStorageConfig {
            base_dir: dir.path().to_path_buf(),
            auto_create: true,
            pragmas: Pragmas::default(),
            pool_size: 2,
        });
        let p = pools.path_for("../../evil", "../../etc/passwd");
        assert!(p.starts_with(dir.path()));
    }

    #[test]
    fn lazy_open_is_memoised() {
        let dir = tempdir().unwrap();
        let pools = TenantPools::new(TenantStorageConfig {
            base_dir: dir.path().to_path_buf(),
            auto_create: true,
            pragmas: Pragmas::default(),
            pool_size: 2,
        });
        let a = pools.get_or_open("alpha", "master").unwrap();
        let b = pools.get_or_open("alpha", "master").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_file_without_autocreate_errors() {
        let dir = tempdir().unwrap();
        let pools = TenantPools::new(TenantStorageConfig {
            base_dir: dir.path().to_path_buf(),
            auto_create: false,
            pragmas: Pragmas::default(),
            pool_size: 2,
        });
        assert!(pools.get_or_open("alpha", "master").is_err());
    }
}
