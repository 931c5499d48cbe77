//! Query router: extracts table references from a statement and decides
//! whether it goes to the tenant's main database file or a single
//! isolated table's dedicated file.
//!
//! The extraction is a regex pass over `FROM|JOIN|INTO|UPDATE` clauses —
//! over-approximate but safe: table-valued functions, CTEs, and
//! subqueries that reach an isolated table through indirection will be
//! misclassified, but the router fails closed (`CrossDatabaseQuery`)
//! rather than silently routing to the wrong file. See §9 open questions.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Error, ErrorContext, Result};
use crate::storage::isolated::IsolatedTableCatalog;

static TABLE_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:FROM|JOIN|INTO|UPDATE)\s+(\[[^\]]+\]|[A-Za-z_][A-Za-z0-9_\.\[\]]*)")
        .unwrap()
});

/// A single normalised table reference: its schema (defaulted to `dbo`)
/// and bare name, bracket-quoting stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

fn strip_brackets(part: &str) -> String {
    part.trim_start_matches('[').trim_end_matches(']').to_string()
}

/// Normalise a 1/2/3-part name (`name`, `schema.name`, `db.schema.name`)
/// into a [`TableRef`], defaulting schema to `dbo` when unqualified and
/// discarding a leading database part (routing is already scoped to one
/// database by the caller).
fn normalize(raw: &str) -> TableRef {
    let parts: Vec<String> = raw.split('.').map(strip_brackets).collect();
    match parts.len() {
        1 => TableRef {
            schema: "dbo".to_string(),
            name: parts[0].clone(),
        },
        2 => TableRef {
            schema: parts[0].clone(),
            name: parts[1].clone(),
        },
        _ => TableRef {
            schema: parts[parts.len() - 2].clone(),
            name: parts[parts.len() - 1].clone(),
        },
    }
}

pub fn extract_table_refs(sql: &str) -> Vec<TableRef> {
    TABLE_REF_RE
        .captures_iter(sql)
        .map(|cap| normalize(&cap[1]))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Main,
    Isolated(TableRef),
}

/// Classify a statement's table mix per spec §4.5's table:
///
/// | Table mix | Action |
/// |---|---|
/// | Zero tables | main |
/// | All in main | main |
/// | Exactly one isolated table (self-joins allowed) | that table's file |
/// | Mix of isolated+main, or two different isolated tables | fail |
pub fn route(
    database: &str,
    sql: &str,
    catalog: &IsolatedTableCatalog,
) -> Result<RouteTarget> {
    let refs = extract_table_refs(sql);
    let mut isolated: HashSet<TableRef> = HashSet::new();
    let mut has_main = false;

    for r in &refs {
        if catalog.is_isolated(database, &r.schema, &r.name) {
            isolated.insert(r.clone());
        } else {
            has_main = true;
        }
    }

    match (isolated.len(), has_main) {
        (0, _) => Ok(RouteTarget::Main),
        (1, false) => Ok(RouteTarget::Isolated(isolated.into_iter().next().unwrap())),
        _ => {
            let mut names: Vec<String> = refs
                .iter()
                .map(|r| format!("{}.{}", r.schema, r.name))
                .collect();
            names.sort();
            names.dedup();
            Err(Error::CrossDatabaseQuery {
                tables: names,
                ctx: ErrorContext::new().with_database(database),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationSet;
    use crate::storage::isolated::TableMetadata;

    fn catalog_with_isolated(schema: &str, name: &str) -> IsolatedTableCatalog {
        let catalog = IsolatedTableCatalog::new();
        let (set, _) = AnnotationSet::from_pairs(vec![("isolated".to_string(), String::new())]);
        catalog.register(TableMetadata {
            database: "master".to_string(),
            schema: schema.to_string(),
            name: name.to_string(),
            annotations: set,
            columns: vec![],
            created_at: 0,
            modified_at: 0,
        });
        catalog
    }

    #[test]
    fn zero_tables_routes_main() {
        let catalog = IsolatedTableCatalog::new();
        assert_eq!(route("master", "SELECT 1", &catalog).unwrap(), RouteTarget::Main);
    }

    #[test]
    fn single_isolated_table_routes_to_its_file() {
        let catalog = catalog_with_isolated("dbo", "AuditLog");
        let target = route("master", "INSERT INTO AuditLog VALUES (1)", &catalog).unwrap();
        assert_eq!(
            target,
            RouteTarget::Isolated(TableRef {
                schema: "dbo".to_string(),
                name: "AuditLog".to_string()
            })
        );
    }

    #[test]
    fn self_join_on_isolated_table_is_allowed() {
        let catalog = catalog_with_isolated("dbo", "AuditLog");
        let sql = "SELECT * FROM AuditLog a JOIN AuditLog b ON a.id = b.parent_id";
        assert!(route("master", sql, &catalog).is_ok());
    }

    #[test]
    fn mix_of_isolated_and_main_fails_closed() {
        let catalog = catalog_with_isolated("dbo", "AuditLog");
        let sql = "SELECT * FROM AuditLog JOIN Users ON AuditLog.uid = Users.id";
        let err = route("master", sql, &catalog).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::CrossDatabaseQuery);
    }

    #[test]
    fn two_different_isolated_tables_fail() {
        let catalog = catalog_with_isolated("dbo", "AuditLog");
        let (set, _) = AnnotationSet::from_pairs(vec![("isolated".to_string(), String::new())]);
        catalog.register(TableMetadata {
            database: "master".to_string(),
            schema: "dbo".to_string(),
            name: "Events".to_string(),
            annotations: set,
            columns: vec![],
            created_at: 0,
            modified_at: 0,
        });
        let sql = "SELECT * FROM AuditLog JOIN Events ON AuditLog.id = Events.aid";
        assert!(route("master", sql, &catalog).is_err());
    }
}
