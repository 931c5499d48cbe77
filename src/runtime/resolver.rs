//! `ProcedureResolver`: the seam the embedded interpreter calls back
//! through for nested `EXEC`, ad hoc `SELECT`/DML, and transaction
//! control. The interpreter never touches the registry, storage layer,
//! or JIT manager directly — everything it needs crosses this trait, so
//! swapping in a fuller T-SQL engine later only means implementing this
//! trait again.

use std::collections::HashMap;

use crate::errors::Result;
use crate::runtime::context::{ExecContext, ExecOutcome};
use crate::storage::{ResultSet, Value};

pub trait ProcedureResolver: Send + Sync {
    /// Re-enter the runtime for `EXEC name ...`. Implementations own the
    /// nesting-depth check; callers never need to touch
    /// `ctx.nesting_level` themselves.
    fn exec_procedure(
        &self,
        ctx: &mut ExecContext,
        name: &str,
        params: HashMap<String, Value>,
    ) -> Result<ExecOutcome>;

    fn query(&self, ctx: &ExecContext, sql: &str, params: &[Value]) -> Result<ResultSet>;

    fn exec_statement(&self, ctx: &ExecContext, sql: &str, params: &[Value]) -> Result<u64>;

    fn begin(&self, ctx: &mut ExecContext) -> Result<()>;
    fn commit(&self, ctx: &mut ExecContext) -> Result<()>;
    fn rollback(&self, ctx: &mut ExecContext) -> Result<()>;
}
