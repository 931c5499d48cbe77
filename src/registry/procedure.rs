//! `Procedure`: the registry's unit of storage.

use crate::annotation::AnnotationSet;

/// `{qualifiedName = database.schema.name, database, schema, name,
/// source, sourceHash, annotations, loadedAt}`. Ownership: the registry
/// exclusively owns procedures; callers obtain read-only references.
#[derive(Debug, Clone)]
pub struct Procedure {
    pub database: String,
    pub schema: String,
    pub name: String,
    /// `Some(tenant)` for entries loaded from `_tenant/{tenant}/...`.
    pub tenant: Option<String>,
    pub source: String,
    pub source_hash: String,
    pub annotations: AnnotationSet,
    pub loaded_at: i64,
}

impl Procedure {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }

    pub fn jit_threshold(&self, default: i64) -> i64 {
        self.annotations.get_int("jit-threshold", default)
    }

    pub fn no_jit(&self) -> bool {
        self.annotations.get_bool("no-jit")
    }

    pub fn timeout(&self, default: std::time::Duration) -> std::time::Duration {
        self.annotations.get_duration("timeout", default)
    }
}
