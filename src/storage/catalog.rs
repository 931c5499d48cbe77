//! System catalog interception: `sys.*` and `INFORMATION_SCHEMA.*`
//! queries are answered synthetically, before routing, rather than ever
//! reaching a backing SQLite file.

use std::sync::atomic::{AtomicI64, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::registry::ProcedureRegistry;
use crate::storage::backend::{ColumnInfo, ResultSet, Value};
use crate::storage::isolated::IsolatedTableCatalog;

static SYSTEM_OBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(sys\.(tables|procedures|schemas|objects|columns|types|databases)|information_schema\.[a-z_]+)\b")
        .unwrap()
});

/// `true` if `sql` references a synthetic system object and must be
/// intercepted before the router ever sees it.
pub fn is_system_catalog_query(sql: &str) -> bool {
    SYSTEM_OBJECT_RE.is_match(sql)
}

/// Object ids are synthesised at query time and are only stable within
/// one server run: tables start at 1, procedures at 10000 (spec §4.5/§9).
pub struct ObjectIdAllocator {
    next_table_id: AtomicI64,
    next_procedure_id: AtomicI64,
}

impl ObjectIdAllocator {
    pub fn new() -> Self {
        ObjectIdAllocator {
            next_table_id: AtomicI64::new(1),
            next_procedure_id: AtomicI64::new(10000),
        }
    }

    pub fn next_table_id(&self) -> i64 {
        self.next_table_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_procedure_id(&self) -> i64 {
        self.next_procedure_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ObjectIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed list of SQL Server type identifiers `sys.types` answers with.
const SQL_TYPES: &[(&str, &str)] = &[
    ("int", "4"),
    ("bigint", "8"),
    ("smallint", "2"),
    ("tinyint", "1"),
    ("bit", "1"),
    ("float", "8"),
    ("real", "4"),
    ("decimal", "17"),
    ("numeric", "17"),
    ("varchar", "8000"),
    ("nvarchar", "8000"),
    ("char", "8000"),
    ("nchar", "8000"),
    ("text", "16"),
    ("datetime", "8"),
    ("date", "3"),
    ("uniqueidentifier", "16"),
    ("varbinary", "8000"),
    ("binary", "8000"),
];

/// `sys.databases` answers a fixed list of system databases alongside
/// whatever the caller's own databases are (callers append theirs).
pub const SYSTEM_DATABASES: &[&str] = &["master", "tempdb", "model", "msdb"];

pub struct SystemCatalog<'a> {
    pub isolated: &'a IsolatedTableCatalog,
    pub registry: &'a ProcedureRegistry,
    pub ids: &'a ObjectIdAllocator,
}

impl<'a> SystemCatalog<'a> {
    /// Answer a system-catalog query synthetically. `table_names_in_main`
    /// supplies the non-isolated table names visible via
    /// `sqlite_master` in the tenant's main database file, since the
    /// catalog module itself never touches a backing file directly.
    pub fn answer(&self, sql: &str, database: &str, table_names_in_main: &[String]) -> Option<ResultSet> {
        let lower = sql.to_lowercase();
        if lower.contains("sys.tables") {
            Some(self.tables(database, table_names_in_main))
        } else if lower.contains("sys.procedures") {
            Some(self.procedures(database))
        } else if lower.contains("sys.types") {
            Some(self.types())
        } else if lower.contains("sys.databases") {
            Some(self.databases())
        } else if lower.contains("sys.schemas") {
            Some(self.schemas())
        } else if lower.contains("sys.objects") {
            Some(self.objects(database, table_names_in_main))
        } else if lower.contains("sys.columns") {
            Some(self.columns(database))
        } else {
            None
        }
    }

    fn tables(&self, database: &str, main_tables: &[String]) -> ResultSet {
        let mut rows = Vec::new();
        for name in main_tables {
            rows.push(vec![
                Value::Text(name.clone()),
                Value::Int(self.ids.next_table_id()),
                Value::Text("dbo".to_string()),
            ]);
        }
        for meta in self.isolated.all() {
            if meta.database == database {
                rows.push(vec![
                    Value::Text(meta.name.clone()),
                    Value::Int(self.ids.next_table_id()),
                    Value::Text(meta.schema.clone()),
                ]);
            }
        }
        ResultSet {
            columns: vec![
                col("name"),
                col("object_id"),
                col("schema_name"),
            ],
            rows,
        }
    }

    fn procedures(&self, database: &str) -> ResultSet {
        let rows = self
            .registry
            .procedures_for_database(database)
            .into_iter()
            .map(|p| {
                vec![
                    Value::Text(p.name.clone()),
                    Value::Int(self.ids.next_procedure_id()),
                    Value::Text(p.schema.clone()),
                ]
            })
            .collect();
        ResultSet {
            columns: vec![col("name"), col("object_id"), col("schema_name")],
            rows,
        }
    }

    fn types(&self) -> ResultSet {
        let rows = SQL_TYPES
            .iter()
            .map(|(name, max_len)| vec![Value::Text(name.to_string()), Value::Text(max_len.to_string())])
            .collect();
        ResultSet {
            columns: vec![col("name"), col("max_length")],
            rows,
        }
    }

    fn databases(&self) -> ResultSet {
        let rows = SYSTEM_DATABASES
            .iter()
            .map(|name| vec![Value::Text(name.to_string())])
            .collect();
        ResultSet {
            columns: vec![col("name")],
            rows,
        }
    }

    fn schemas(&self) -> ResultSet {
        ResultSet {
            columns: vec![col("name")],
            rows: vec![vec![Value::Text("dbo".to_string())]],
        }
    }

    fn objects(&self, database: &str, main_tables: &[String]) -> ResultSet {
        // Tables + procedures share one synthetic object namespace here.
        let mut rs = self.tables(database, main_tables);
        let procs = self.procedures(database);
        rs.rows.extend(procs.rows);
        rs
    }

    fn columns(&self, _database: &str) -> ResultSet {
        ResultSet {
            columns: vec![col("table_name"), col("column_name"), col("data_type")],
            rows: vec![],
        }
    }
}

fn col(name: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        sql_type: "nvarchar".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_system_catalog_queries() {
        assert!(is_system_catalog_query("SELECT * FROM sys.tables"));
        assert!(is_system_catalog_query("select name from INFORMATION_SCHEMA.tables"));
        assert!(!is_system_catalog_query("SELECT * FROM Users"));
    }

    #[test]
    fn object_ids_start_at_documented_offsets() {
        let ids = ObjectIdAllocator::new();
        assert_eq!(ids.next_table_id(), 1);
        assert_eq!(ids.next_table_id(), 2);
        assert_eq!(ids.next_procedure_id(), 10000);
    }
}
