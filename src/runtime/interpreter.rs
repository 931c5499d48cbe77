//! A narrow statement-level T-SQL execution facade.
//!
//! Spec §1 names "the embedded T-SQL parser/interpreter library" as an
//! external collaborator out of this crate's scope. This module is the
//! trait boundary that collaborator would implement
//! (`Interpreter::run`), plus a small reference implementation good
//! enough to run the `SELECT`/`EXEC`/`BEGIN`/`COMMIT`/`ROLLBACK`/
//! variable-assignment procedures exercised by this crate's own tests.
//! It is not a T-SQL surface implementation and makes no claim to be
//! one: no joins across statement boundaries, no control flow, no
//! expression evaluation beyond literals and `@variable` substitution.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Error, ErrorContext, Result};
use crate::runtime::context::ExecContext;
use crate::runtime::resolver::ProcedureResolver;
use crate::runtime::context::ExecOutcome;
use crate::storage::Value;

pub trait Interpreter: Send + Sync {
    fn run(
        &self,
        ctx: &mut ExecContext,
        source: &str,
        resolver: &dyn ProcedureResolver,
    ) -> Result<ExecOutcome>;
}

/// One declared procedure parameter: `@name [OUTPUT]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParamDecl {
    name: String,
    is_output: bool,
}

static SIGNATURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)CREATE\s+PROC(?:EDURE)?\s+[^\s(]+\s*\(([^)]*)\)\s*AS\s").unwrap());

static PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(@[A-Za-z_][A-Za-z0-9_]*)\s*(?:[A-Za-z0-9_()]+)?\s*(OUTPUT|OUT)?").unwrap());

static BODY_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)\bAS\b").unwrap());

static EXEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^EXEC(?:UTE)?\s+([^\s(]+)\s*(.*)$").unwrap());

static EXEC_ARG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(@[A-Za-z_][A-Za-z0-9_]*)\s*=\s*([^,]+?)(\s+OUTPUT)?$").unwrap());

static SET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(?:DECLARE|SET)\s+(@[A-Za-z_][A-Za-z0-9_]*)(?:\s+\w+(?:\([^)]*\))?)?\s*(?:=\s*(.*))?$").unwrap());

fn parse_signature(source: &str) -> Vec<ParamDecl> {
    let Some(caps) = SIGNATURE_RE.captures(source) else {
        return Vec::new();
    };
    let param_list = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    param_list
        .split(',')
        .filter_map(|segment| {
            let segment = segment.trim();
            if segment.is_empty() {
                return None;
            }
            PARAM_RE.captures(segment).map(|c| ParamDecl {
                name: c[1].trim_start_matches('@').to_string(),
                is_output: c.get(2).is_some(),
            })
        })
        .collect()
}

/// Strip the `CREATE PROCEDURE ... AS` header, returning the statement
/// body. Falls back to treating the whole source as the body when no
/// header is present (ad hoc batches, not `CREATE PROCEDURE`s).
fn body_of(source: &str) -> &str {
    match BODY_SPLIT_RE.find(source) {
        Some(m) if SIGNATURE_RE.is_match(source) => &source[m.end()..],
        _ => source,
    }
}

fn literal_to_value(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Some(inner) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Value::Text(inner.to_string());
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Text(raw.to_string())
}

/// Substitutes `@name` occurrences with their bound value's literal
/// rendering, for statements handed to the storage layer verbatim.
pub(crate) fn substitute_vars(sql: &str, vars: &HashMap<String, Value>) -> String {
    let mut out = sql.to_string();
    // Longest name first: `@out2` must substitute before `@out`, or
    // replacing `@out` as a substring would corrupt `@out2`'s occurrences.
    let mut by_name: Vec<(&String, &Value)> = vars.iter().collect();
    by_name.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
    for (name, value) in by_name {
        let needle = format!("@{name}");
        let replacement = match value {
            Value::Null => "NULL".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => (if *b { 1 } else { 0 }).to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Blob(_) => "NULL".to_string(),
        };
        out = out.replace(&needle, &replacement);
    }
    out
}

/// Binds `RPC_REQUEST` positional parameters to synthetic `@p1, @p2, …`
/// names (spec §4.3: "positional parameters from RPC are assigned
/// synthetic names") and substitutes them into an ad hoc batch's text
/// the same way a declared procedure's own parameters are substituted.
/// Used for `sp_executesql`, whose parameters bind by name into the SQL
/// text rather than by declared signature.
pub fn bind_positional_params(sql: &str, params: &[Value]) -> String {
    let vars: HashMap<String, Value> = params
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("p{}", i + 1), v.clone()))
        .collect();
    substitute_vars(sql, &vars)
}

/// Reference implementation. Statements are split on top-level `;` or
/// newlines; each is dispatched by its leading keyword.
pub struct ReferenceInterpreter;

impl Interpreter for ReferenceInterpreter {
    fn run(
        &self,
        ctx: &mut ExecContext,
        source: &str,
        resolver: &dyn ProcedureResolver,
    ) -> Result<ExecOutcome> {
        let params = parse_signature(source);
        let mut vars: HashMap<String, Value> = HashMap::new();
        for p in &params {
            if let Some(v) = ctx.parameters.get(&p.name) {
                vars.insert(p.name.clone(), v.clone());
            }
        }

        let mut outcome = ExecOutcome::default();

        for raw_stmt in body_of(source).split(|c| c == ';' || c == '\n') {
            let stmt = raw_stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            self.run_statement(ctx, stmt, resolver, &mut vars, &mut outcome)?;
        }

        for p in &params {
            if p.is_output {
                if let Some(v) = vars.get(&p.name) {
                    outcome.output_params.insert(p.name.clone(), v.clone());
                }
            }
        }

        Ok(outcome)
    }
}

impl ReferenceInterpreter {
    fn run_statement(
        &self,
        ctx: &mut ExecContext,
        stmt: &str,
        resolver: &dyn ProcedureResolver,
        vars: &mut HashMap<String, Value>,
        outcome: &mut ExecOutcome,
    ) -> Result<()> {
        let upper = stmt.to_ascii_uppercase();

        if upper.starts_with("BEGIN TRAN") || upper == "BEGIN" || upper.starts_with("BEGIN TRANSACTION") {
            return resolver.begin(ctx);
        }
        if upper.starts_with("COMMIT") {
            return resolver.commit(ctx);
        }
        if upper.starts_with("ROLLBACK") {
            return resolver.rollback(ctx);
        }

        if let Some(caps) = SET_RE.captures(stmt) {
            let name = caps[1].trim_start_matches('@').to_string();
            let value = caps
                .get(2)
                .map(|m| literal_to_value(m.as_str()))
                .unwrap_or(Value::Null);
            vars.insert(name, value);
            return Ok(());
        }

        if let Some(caps) = EXEC_RE.captures(stmt) {
            let name = caps[1].to_string();
            let arg_str = caps.get(2).map(|m| m.as_str()).unwrap_or("").trim();
            let mut params = HashMap::new();
            let mut output_bindings: Vec<String> = Vec::new();
            if !arg_str.is_empty() {
                for (i, arg) in arg_str.split(',').enumerate() {
                    let arg = arg.trim().trim_end_matches("OUTPUT").trim_end_matches("OUT").trim();
                    if let Some(caps) = EXEC_ARG_RE.captures(arg) {
                        let pname = caps[1].trim_start_matches('@').to_string();
                        let is_output = caps.get(3).is_some();
                        let rhs = caps[2].trim();
                        let value = vars
                            .get(rhs.trim_start_matches('@'))
                            .cloned()
                            .unwrap_or_else(|| literal_to_value(rhs));
                        if is_output {
                            output_bindings.push(pname.clone());
                        }
                        params.insert(pname, value);
                    } else {
                        let value = vars
                            .get(arg.trim_start_matches('@'))
                            .cloned()
                            .unwrap_or_else(|| literal_to_value(arg));
                        params.insert(format!("p{}", i + 1), value);
                    }
                }
            }
            let nested = resolver.exec_procedure(ctx, &name, params)?;
            for out_name in output_bindings {
                if let Some(v) = nested.output_params.get(&out_name) {
                    vars.insert(out_name, v.clone());
                }
            }
            outcome.result_sets.extend(nested.result_sets);
            outcome.rows_affected += nested.rows_affected;
            return Ok(());
        }

        let resolved = substitute_vars(stmt, vars);
        if upper.starts_with("SELECT") {
            let rs = resolver.query(ctx, &resolved, &[])?;
            outcome.result_sets.push(rs);
            return Ok(());
        }

        let affected = resolver.exec_statement(ctx, &resolved, &[])?;
        outcome.rows_affected += affected;
        Ok(())
    }
}

#[allow(dead_code)]
fn unsupported(stmt: &str) -> Error {
    Error::NotImplemented {
        what: format!("statement form: {stmt}"),
        ctx: ErrorContext::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::ExecContext;
    use crate::storage::{ExecResult, ResultSet};
    use std::sync::Mutex;

    #[test]
    fn substitute_vars_does_not_corrupt_prefix_named_variable() {
        let mut vars = HashMap::new();
        vars.insert("out".to_string(), Value::Int(42));
        vars.insert("out2".to_string(), Value::Int(99));
        let resolved = substitute_vars("SELECT @out2, @out", &vars);
        assert_eq!(resolved, "SELECT 99, 42");
    }

    struct FakeResolver {
        queries: Mutex<Vec<String>>,
        execs: Mutex<Vec<String>>,
    }

    impl FakeResolver {
        fn new() -> Self {
            FakeResolver {
                queries: Mutex::new(Vec::new()),
                execs: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProcedureResolver for FakeResolver {
        fn exec_procedure(
            &self,
            _ctx: &mut ExecContext,
            name: &str,
            _params: HashMap<String, Value>,
        ) -> Result<ExecOutcome> {
            let mut out = ExecOutcome::default();
            if name.eq_ignore_ascii_case("SetOut") {
                out.output_params.insert("out".to_string(), Value::Int(42));
            }
            Ok(out)
        }

        fn query(&self, _ctx: &ExecContext, sql: &str, _params: &[Value]) -> Result<ResultSet> {
            self.queries.lock().unwrap().push(sql.to_string());
            Ok(ResultSet::default())
        }

        fn exec_statement(&self, _ctx: &ExecContext, sql: &str, _params: &[Value]) -> Result<u64> {
            self.execs.lock().unwrap().push(sql.to_string());
            let _ = ExecResult::default();
            Ok(1)
        }

        fn begin(&self, ctx: &mut ExecContext) -> Result<()> {
            ctx.nesting_level += 0;
            Ok(())
        }
        fn commit(&self, _ctx: &mut ExecContext) -> Result<()> {
            Ok(())
        }
        fn rollback(&self, _ctx: &mut ExecContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn runs_select_against_the_resolver() {
        let resolver = FakeResolver::new();
        let mut ctx = ExecContext::new(1, "master", "sa");
        let interp = ReferenceInterpreter;
        let outcome = interp
            .run(&mut ctx, "SELECT 1", &resolver)
            .unwrap();
        assert_eq!(outcome.result_sets.len(), 1);
    }

    #[test]
    fn nested_exec_output_param_flows_back() {
        let resolver = FakeResolver::new();
        let mut ctx = ExecContext::new(1, "master", "sa");
        let interp = ReferenceInterpreter;
        let source = "CREATE PROCEDURE dbo.Caller () AS DECLARE @out INT EXEC SetOut @out=@out OUTPUT SELECT @out";
        interp.run(&mut ctx, source, &resolver).unwrap();
        assert_eq!(resolver.queries.lock().unwrap().len(), 1);
        assert!(resolver.queries.lock().unwrap()[0].contains("42"));
    }

    #[test]
    fn declared_output_parameter_surfaces_in_outcome() {
        let resolver = FakeResolver::new();
        let mut ctx = ExecContext::new(1, "master", "sa");
        ctx.parameters.insert("out".to_string(), Value::Int(7));
        let interp = ReferenceInterpreter;
        let source = "CREATE PROCEDURE dbo.B (@out INT OUTPUT) AS SET @out = 42";
        let outcome = interp.run(&mut ctx, source, &resolver).unwrap();
        assert_eq!(outcome.output_params.get("out"), Some(&Value::Int(42)));
    }
}
