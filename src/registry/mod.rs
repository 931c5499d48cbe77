//! Procedure registry and hierarchical/tenant resolver (C2).

mod loader;
mod procedure;
mod watch;

pub use loader::{load_tree, LoadReport};
pub use procedure::Procedure;
pub use watch::{spawn_watcher, WatchEvent};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{Error, ErrorContext, Result};

/// Ordered lookup key: `tenant override`, `database-scoped`, or `global`.
/// See spec §3's three-rung resolution order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    TenantOverride {
        tenant: String,
        database: String,
        schema: String,
        name: String,
    },
    DatabaseScoped {
        database: String,
        schema: String,
        name: String,
    },
    Global {
        schema: String,
        name: String,
    },
}

/// The registry exclusively owns procedures; callers obtain read-only
/// `Arc<Procedure>` references that remain valid even after a hot reload
/// swaps the registry's entry (see `registry::watch`).
pub struct ProcedureRegistry {
    root: PathBuf,
    entries: RwLock<HashMap<Slot, Arc<Procedure>>>,
}

impl ProcedureRegistry {
    pub fn new(root: PathBuf) -> Self {
        ProcedureRegistry {
            root,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Load every procedure under the root tree, replacing whatever was
    /// loaded before. Used at startup; hot reload instead swaps
    /// individual entries (see `watch::spawn_watcher`).
    pub fn load_all(&self) -> Result<LoadReport> {
        let (procedures, report) = load_tree(&self.root)?;
        let mut map = HashMap::new();
        for proc in procedures {
            map.insert(slot_for(&proc), Arc::new(proc));
        }
        *self.entries.write() = map;
        Ok(report)
    }

    pub fn register(&self, proc: Procedure) {
        self.entries.write().insert(slot_for(&proc), Arc::new(proc));
    }

    pub fn unregister(&self, proc: &Procedure) {
        self.entries.write().remove(&slot_for(proc));
    }

    /// `LookupForTenant(name, currentDatabase, tenant)`: applies the
    /// three-rung resolution order from spec §3. Unqualified names
    /// default to schema `dbo` and the current database.
    pub fn lookup_for_tenant(
        &self,
        name: &str,
        current_database: &str,
        tenant: Option<&str>,
    ) -> Result<Arc<Procedure>> {
        let (schema, proc_name, database_override) = split_qualified(name, current_database);
        let database = database_override.unwrap_or_else(|| current_database.to_string());

        let entries = self.entries.read();

        if let Some(tenant) = tenant {
            let slot = Slot::TenantOverride {
                tenant: tenant.to_string(),
                database: database.clone(),
                schema: schema.clone(),
                name: proc_name.clone(),
            };
            if let Some(p) = entries.get(&slot) {
                return Ok(p.clone());
            }
        }

        let slot = Slot::DatabaseScoped {
            database: database.clone(),
            schema: schema.clone(),
            name: proc_name.clone(),
        };
        if let Some(p) = entries.get(&slot) {
            return Ok(p.clone());
        }

        let slot = Slot::Global {
            schema: schema.clone(),
            name: proc_name.clone(),
        };
        if let Some(p) = entries.get(&slot) {
            return Ok(p.clone());
        }

        Err(Error::ProcNotFound {
            name: name.to_string(),
            ctx: ErrorContext::new()
                .with_database(database)
                .with_procedure(proc_name),
        })
    }

    pub fn procedures_for_database(&self, database: &str) -> Vec<Arc<Procedure>> {
        self.entries
            .read()
            .values()
            .filter(|p| p.database == database || p.database == "_global")
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn slot_for(proc: &Procedure) -> Slot {
    if let Some(tenant) = &proc.tenant {
        Slot::TenantOverride {
            tenant: tenant.clone(),
            database: proc.database.clone(),
            schema: proc.schema.clone(),
            name: proc.name.clone(),
        }
    } else if proc.database == "_global" {
        Slot::Global {
            schema: proc.schema.clone(),
            name: proc.name.clone(),
        }
    } else {
        Slot::DatabaseScoped {
            database: proc.database.clone(),
            schema: proc.schema.clone(),
            name: proc.name.clone(),
        }
    }
}

/// Split `name` into `(schema, name, database_override)`. Accepts
/// `name`, `schema.name`, or `database.schema.name`; unqualified names
/// default to schema `dbo`.
fn split_qualified(name: &str, _current_database: &str) -> (String, String, Option<String>) {
    let parts: Vec<&str> = name.split('.').collect();
    match parts.len() {
        1 => ("dbo".to_string(), parts[0].to_string(), None),
        2 => (parts[0].to_string(), parts[1].to_string(), None),
        _ => (
            parts[parts.len() - 2].to_string(),
            parts[parts.len() - 1].to_string(),
            Some(parts[..parts.len() - 2].join(".")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationSet;

    fn proc(database: &str, schema: &str, name: &str, tenant: Option<&str>) -> Procedure {
        Procedure {
            database: database.to_string(),
            schema: schema.to_string(),
            name: name.to_string(),
            tenant: tenant.map(String::from),
            source: format!("CREATE PROCEDURE {schema}.{name} AS SELECT 1"),
            source_hash: "deadbeef".to_string(),
            annotations: AnnotationSet::new(),
            loaded_at: 0,
        }
    }

    #[test]
    fn tenant_override_wins_over_database_and_global() {
        let registry = ProcedureRegistry::new(PathBuf::from("/nonexistent"));
        registry.register(proc("_global", "dbo", "GetConfig", None));
        registry.register(proc("master", "dbo", "GetConfig", None));
        registry.register(proc("master", "dbo", "GetConfig", Some("alpha")));

        let p = registry
            .lookup_for_tenant("GetConfig", "master", Some("alpha"))
            .unwrap();
        assert_eq!(p.tenant.as_deref(), Some("alpha"));

        let p = registry
            .lookup_for_tenant("GetConfig", "master", Some("beta"))
            .unwrap();
        assert_eq!(p.tenant, None);
        assert_eq!(p.database, "master");

        let p = registry
            .lookup_for_tenant("GetConfig", "other_db", None)
            .unwrap();
        assert_eq!(p.database, "_global");
    }

    #[test]
    fn missing_procedure_errors() {
        let registry = ProcedureRegistry::new(PathBuf::from("/nonexistent"));
        let err = registry.lookup_for_tenant("Nope", "master", None).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ProcNotFound);
    }
}
