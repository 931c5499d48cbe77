//! Execution runtime (C3): tier dispatch, parameter binding, nested
//! calls, transactions.

pub mod context;
pub mod interpreter;
pub mod resolver;
pub mod txn;

pub use context::{ExecContext, ExecOutcome, TransactionContext, MAX_NESTING_LEVEL};
pub use interpreter::{bind_positional_params, Interpreter, ReferenceInterpreter};
pub use resolver::ProcedureResolver;

use std::collections::HashMap;
use std::os::raw::c_void;
use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::{Error, ErrorContext, Result};
use crate::jit::JitManager;
use crate::registry::ProcedureRegistry;
use crate::storage::{StorageBackend, StorageLayer, Value};

/// Global defaults consulted when a procedure doesn't override them via
/// annotation (spec §4.3, §4.6).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub delegation_enabled: bool,
    pub jit_enabled: bool,
    pub default_jit_threshold: i64,
    pub default_timeout: std::time::Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            delegation_enabled: true,
            jit_enabled: true,
            default_jit_threshold: 50,
            default_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Owns the collaborators the tier-dispatch algorithm needs: the
/// procedure registry, the tenant-aware storage layer, an optional JIT
/// manager (absent when JIT is disabled entirely), and the embedded
/// interpreter. One instance is shared across all sessions.
pub struct Runtime {
    pub registry: Arc<ProcedureRegistry>,
    pub storage: Arc<StorageLayer>,
    pub jit: Option<Arc<JitManager>>,
    interpreter: Box<dyn Interpreter>,
    invocation_counts: DashMap<String, u64>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(
        registry: Arc<ProcedureRegistry>,
        storage: Arc<StorageLayer>,
        jit: Option<Arc<JitManager>>,
        config: RuntimeConfig,
    ) -> Self {
        Runtime {
            registry,
            storage,
            jit,
            interpreter: Box::new(ReferenceInterpreter),
            invocation_counts: crate::utils::dashmap::new_dashmap(num_cpus::get()),
            config,
        }
    }

    fn main_backend(&self, ctx: &ExecContext) -> Result<Arc<dyn StorageBackend>> {
        let tenant = ctx.tenant.as_deref().unwrap_or(crate::storage::DEFAULT_TENANT);
        Ok(self.storage.tenants.get_or_open(tenant, &ctx.database)?)
    }

    /// The tier-dispatch algorithm from spec §4.3: delegated, then JIT,
    /// then interpreted. Entry point for both top-level client requests
    /// and nested `EXEC` (via [`ProcedureResolver::exec_procedure`]).
    fn dispatch(&self, ctx: &mut ExecContext, name: &str, params: HashMap<String, Value>) -> Result<ExecOutcome> {
        let proc = self.registry.lookup_for_tenant(name, &ctx.database, ctx.tenant.as_deref())?;
        let backend = self.main_backend(ctx)?;
        let qualified = proc.qualified_name();

        if self.config.delegation_enabled && backend.supports_procedures() {
            let positional: Vec<Value> = params.values().cloned().collect();
            match backend.call_delegated(&qualified, &positional, ctx.txn.as_ref().map(|t| t.driver_txn)) {
                Ok(r) => {
                    return Ok(ExecOutcome {
                        result_sets: Vec::new(),
                        rows_affected: r.rows_affected,
                        output_params: HashMap::new(),
                    })
                }
                Err(Error::NotImplemented { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if self.config.jit_enabled && !proc.no_jit() {
            if let Some(jit) = &self.jit {
                if jit.is_ready(&qualified, &proc.source_hash) {
                    if let Some(plugin) = jit.loaded(&qualified) {
                        let compiled_params: aul_jit_abi::CompiledParams = params.values().cloned().collect();
                        let mut host_ctx = JitHostCtx { runtime: self as *const Runtime, ctx: &mut *ctx as *mut ExecContext };
                        let outcome = unsafe {
                            let ptr = (plugin.func)(
                                &compiled_params as *const _,
                                &mut host_ctx as *mut JitHostCtx as *mut c_void,
                                jit_host_callback,
                            );
                            if ptr.is_null() {
                                return Err(Error::JitCompileFailed {
                                    reason: "compiled plugin returned a null outcome".to_string(),
                                    ctx: ErrorContext::new().with_procedure(qualified.clone()),
                                });
                            }
                            *Box::from_raw(ptr)
                        };
                        if let Some(reason) = outcome.error {
                            return Err(Error::exec_failed(
                                JitCallError(reason),
                                ErrorContext::new().with_procedure(qualified.clone()),
                            ));
                        }
                        return Ok(ExecOutcome {
                            result_sets: outcome.result_sets,
                            rows_affected: outcome.rows_affected,
                            output_params: HashMap::new(),
                        });
                    }
                }
            }
        }

        ctx.parameters = params;
        let outcome = self.interpreter.run(ctx, &proc.source, self)?;

        if self.config.jit_enabled {
            if let Some(jit) = &self.jit {
                let threshold = proc.jit_threshold(self.config.default_jit_threshold);
                let count = {
                    let mut entry = self.invocation_counts.entry(qualified.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if !proc.no_jit() && count as i64 >= threshold {
                    jit.maybe_enqueue(&qualified, &proc.source_hash, &proc.source);
                }
            }
        }

        Ok(outcome)
    }

    /// Entry point for a top-level client request (depth 0 on entry).
    pub fn execute(&self, ctx: &mut ExecContext, name: &str, params: HashMap<String, Value>) -> Result<ExecOutcome> {
        self.dispatch_with_depth_guard(ctx, name, params)
    }

    /// Entry point for an ad hoc `SQL_BATCH`: runs `sql` through the
    /// embedded interpreter directly rather than through a registered
    /// procedure, so a client's batch can mix `SELECT`/`EXEC`/txn control
    /// the same way a procedure body can.
    pub fn execute_batch(&self, ctx: &mut ExecContext, sql: &str) -> Result<ExecOutcome> {
        self.interpreter.run(ctx, sql, self)
    }

    fn dispatch_with_depth_guard(
        &self,
        ctx: &mut ExecContext,
        name: &str,
        params: HashMap<String, Value>,
    ) -> Result<ExecOutcome> {
        let saved_depth = ctx.nesting_level;
        let saved_params = ctx.parameters.clone();
        let new_depth = saved_depth + 1;
        if new_depth > MAX_NESTING_LEVEL {
            return Err(Error::NestingLimitExceeded {
                depth: new_depth,
                limit: MAX_NESTING_LEVEL,
                ctx: ErrorContext::new().with_procedure(name),
            });
        }
        ctx.nesting_level = new_depth;
        let result = self.dispatch(ctx, name, params);
        ctx.nesting_level = saved_depth;
        ctx.parameters = saved_params;
        result
    }
}

/// Opaque context a compiled plugin's `host_ctx` pointer refers to while
/// calling back into [`jit_host_callback`]. Raw pointers rather than a
/// lifetime so the struct has a stable, FFI-safe shape; the pointers
/// only stay valid for the duration of the `(plugin.func)(...)` call
/// that builds this context, which is itself synchronous.
struct JitHostCtx {
    runtime: *const Runtime,
    ctx: *mut ExecContext,
}

/// A compiled plugin's only way to actually run a statement: re-enter
/// the host through the normal interpreted path. This keeps JIT and
/// interpreted execution of the same procedure producing identical
/// results — the plugin supplies the source text, the host supplies the
/// semantics.
unsafe extern "C" fn jit_host_callback(
    host_ctx: *mut c_void,
    sql_ptr: *const u8,
    sql_len: usize,
) -> *mut aul_jit_abi::CompiledOutcome {
    let host = &mut *(host_ctx as *mut JitHostCtx);
    let runtime = &*host.runtime;
    let exec_ctx = &mut *host.ctx;

    let outcome = match std::str::from_utf8(std::slice::from_raw_parts(sql_ptr, sql_len)) {
        Ok(sql) => match runtime.execute_batch(exec_ctx, sql) {
            Ok(o) => aul_jit_abi::CompiledOutcome {
                result_sets: o.result_sets,
                rows_affected: o.rows_affected,
                error: None,
            },
            Err(e) => aul_jit_abi::CompiledOutcome {
                result_sets: Vec::new(),
                rows_affected: 0,
                error: Some(e.to_string()),
            },
        },
        Err(e) => aul_jit_abi::CompiledOutcome {
            result_sets: Vec::new(),
            rows_affected: 0,
            error: Some(format!("compiled procedure source was not valid UTF-8: {e}")),
        },
    };
    Box::into_raw(Box::new(outcome))
}

/// Wraps a message surfaced through the JIT host callback so it can be
/// carried by [`Error::exec_failed`] without losing the original text.
#[derive(Debug)]
struct JitCallError(String);

impl std::fmt::Display for JitCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for JitCallError {}

impl ProcedureResolver for Runtime {
    fn exec_procedure(
        &self,
        ctx: &mut ExecContext,
        name: &str,
        params: HashMap<String, Value>,
    ) -> Result<ExecOutcome> {
        self.dispatch_with_depth_guard(ctx, name, params)
    }

    fn query(&self, ctx: &ExecContext, sql: &str, params: &[Value]) -> Result<crate::storage::ResultSet> {
        match self.storage.backend_for_statement(
            ctx.tenant.as_deref().unwrap_or(crate::storage::DEFAULT_TENANT),
            &ctx.database,
            sql,
            &self.registry,
        )? {
            crate::storage::StatementTarget::Backend(backend) => {
                backend.query(sql, params, ctx.txn.as_ref().map(|t| t.driver_txn))
            }
            crate::storage::StatementTarget::SystemCatalog(rs) => Ok(rs),
        }
    }

    fn exec_statement(&self, ctx: &ExecContext, sql: &str, params: &[Value]) -> Result<u64> {
        match self.storage.backend_for_statement(
            ctx.tenant.as_deref().unwrap_or(crate::storage::DEFAULT_TENANT),
            &ctx.database,
            sql,
            &self.registry,
        )? {
            crate::storage::StatementTarget::Backend(backend) => {
                Ok(backend.exec(sql, params, ctx.txn.as_ref().map(|t| t.driver_txn))?.rows_affected)
            }
            crate::storage::StatementTarget::SystemCatalog(_) => Ok(0),
        }
    }

    fn begin(&self, ctx: &mut ExecContext) -> Result<()> {
        let backend = self.main_backend(ctx)?;
        txn::begin(ctx, backend.as_ref())
    }

    fn commit(&self, ctx: &mut ExecContext) -> Result<()> {
        let backend = self.main_backend(ctx)?;
        txn::commit(ctx, backend.as_ref())
    }

    fn rollback(&self, ctx: &mut ExecContext) -> Result<()> {
        let backend = self.main_backend(ctx)?;
        txn::rollback(ctx, backend.as_ref())
    }
}
