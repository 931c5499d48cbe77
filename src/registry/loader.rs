//! Hierarchical loader: walks `{root}/{database}/{schema}/{name}.sql`,
//! plus `{root}/_global/{schema}/{name}.sql` and
//! `{root}/_tenant/{tenant}/{database}/{schema}/{name}.sql`.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::annotation::extract_annotations;
use crate::errors::{Error, ErrorContext, Result};
use crate::registry::procedure::Procedure;

static CREATE_PROC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)CREATE\s+PROCEDURE\s+(\[?[\w]+\]?)\.(\[?[\w]+\]?)").unwrap()
});

#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<PathBuf>,
    pub schema_mismatches: Vec<(PathBuf, String, String)>,
}

pub fn sha256_hex(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse the declared `schema.name` out of the first `CREATE PROCEDURE`
/// statement in `source`.
fn declared_schema_name(source: &str) -> Option<(String, String)> {
    let caps = CREATE_PROC_RE.captures(source)?;
    let schema = caps[1].trim_matches(|c| c == '[' || c == ']').to_string();
    let name = caps[2].trim_matches(|c| c == '[' || c == ']').to_string();
    Some((schema, name))
}

/// Load one `.sql` file into a [`Procedure`], validating that the
/// declared schema in `CREATE PROCEDURE schema.name` equals the
/// directory-derived schema.
pub fn load_one(
    path: &Path,
    database: &str,
    schema: &str,
    name: &str,
    tenant: Option<&str>,
    now: i64,
) -> Result<Procedure> {
    let source = std::fs::read_to_string(path)?;
    if let Some((declared_schema, declared_name)) = declared_schema_name(&source) {
        if declared_schema != schema {
            return Err(Error::SchemaMismatch {
                declared: format!("{declared_schema}.{declared_name}"),
                from_path: format!("{schema}/{name} ({})", path.display()),
                ctx: ErrorContext::new().with_database(database),
            });
        }
    }
    let annotation_blocks = extract_annotations(&source);
    let annotations = annotation_blocks
        .into_iter()
        .next()
        .map(|b| b.set)
        .unwrap_or_default();

    Ok(Procedure {
        database: database.to_string(),
        schema: schema.to_string(),
        name: name.to_string(),
        tenant: tenant.map(String::from),
        source_hash: sha256_hex(&source),
        source,
        annotations,
        loaded_at: now,
    })
}

/// Walk the full tree described in spec §4.2: per-database directories,
/// `_global`, and `_tenant/{tenant}`.
pub fn load_tree(root: &Path) -> Result<(Vec<Procedure>, LoadReport)> {
    let mut procedures = Vec::new();
    let mut report = LoadReport::default();

    if !root.exists() {
        return Ok((procedures, report));
    }

    for top_entry in std::fs::read_dir(root)? {
        let top_entry = top_entry?;
        if !top_entry.file_type()?.is_dir() {
            continue;
        }
        let top_name = top_entry.file_name().to_string_lossy().into_owned();

        if top_name == "_tenant" {
            for tenant_entry in std::fs::read_dir(top_entry.path())? {
                let tenant_entry = tenant_entry?;
                if !tenant_entry.file_type()?.is_dir() {
                    continue;
                }
                let tenant = tenant_entry.file_name().to_string_lossy().into_owned();
                for db_entry in std::fs::read_dir(tenant_entry.path())? {
                    let db_entry = db_entry?;
                    if !db_entry.file_type()?.is_dir() {
                        continue;
                    }
                    let database = db_entry.file_name().to_string_lossy().into_owned();
                    load_schemas(&db_entry.path(), &database, Some(&tenant), &mut procedures, &mut report)?;
                }
            }
            continue;
        }

        let database = if top_name == "_global" {
            "_global".to_string()
        } else {
            top_name
        };
        load_schemas(&top_entry.path(), &database, None, &mut procedures, &mut report)?;
    }

    report.loaded = procedures.len();
    Ok((procedures, report))
}

fn load_schemas(
    database_dir: &Path,
    database: &str,
    tenant: Option<&str>,
    procedures: &mut Vec<Procedure>,
    report: &mut LoadReport,
) -> Result<()> {
    for schema_entry in std::fs::read_dir(database_dir)? {
        let schema_entry = schema_entry?;
        if !schema_entry.file_type()?.is_dir() {
            continue;
        }
        let schema = schema_entry.file_name().to_string_lossy().into_owned();
        for file_entry in std::fs::read_dir(schema_entry.path())? {
            let file_entry = file_entry?;
            let path = file_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(n) => n.to_string(),
                None => {
                    report.skipped.push(path);
                    continue;
                }
            };
            match load_one(&path, database, &schema, &name, tenant, 0) {
                Ok(proc) => procedures.push(proc),
                Err(Error::SchemaMismatch {
                    declared, from_path, ..
                }) => {
                    report.schema_mismatches.push((path, declared, from_path));
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn qualified_name_equals_directory_derivation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master/dbo/GetCustomer.sql");
        write(&path, "CREATE PROCEDURE dbo.GetCustomer AS SELECT 1");
        let (procs, report) = load_tree(dir.path()).unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].qualified_name(), "master.dbo.GetCustomer");
        assert_eq!(report.schema_mismatches.len(), 0);
    }

    #[test]
    fn schema_mismatch_is_reported_not_fatal_to_the_walk() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join("master/dbo/Bad.sql"),
            "CREATE PROCEDURE wrong.Bad AS SELECT 1",
        );
        write(
            &dir.path().join("master/dbo/Good.sql"),
            "CREATE PROCEDURE dbo.Good AS SELECT 1",
        );
        let (procs, report) = load_tree(dir.path()).unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(report.schema_mismatches.len(), 1);
    }

    #[test]
    fn global_and_tenant_trees_are_loaded() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join("_global/dbo/Shared.sql"),
            "CREATE PROCEDURE dbo.Shared AS SELECT 1",
        );
        write(
            &dir.path().join("_tenant/alpha/master/dbo/Over.sql"),
            "CREATE PROCEDURE dbo.Over AS SELECT 1",
        );
        let (procs, _) = load_tree(dir.path()).unwrap();
        assert!(procs.iter().any(|p| p.database == "_global" && p.name == "Shared"));
        assert!(procs
            .iter()
            .any(|p| p.tenant.as_deref() == Some("alpha") && p.name == "Over"));
    }
}
