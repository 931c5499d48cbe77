//! The ABI boundary between the `aul` host process and a JIT-compiled
//! plugin.
//!
//! This crate holds concrete types and a function-pointer type alias
//! only — no trait implementations, no logic, no dependency on the host
//! crate. Host and plugin must be built against the *same copy* of this
//! crate for a `libloading` symbol lookup to be type-safe: that is the
//! entire reason this is its own crate rather than a module of `aul`.

/// A value bound as a query parameter or returned in a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

/// A column in a [`ResultSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
}

/// Rows produced by a query, plus their column metadata.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
}

/// The outcome of an `Exec` (DML/DDL) call.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// Parameters passed to a compiled procedure body, by position.
pub type CompiledParams = Vec<Value>;

/// What a compiled plugin call (or the host callback it makes) actually
/// produces: zero or more result sets, a rows-affected count, and — this
/// is load-bearing, not decorative — an explicit error slot. A plugin
/// that hit a real failure must set `error`, never just return an empty
/// [`CompiledOutcome`]; the host treats the two cases very differently
/// (propagate vs. "ran and produced nothing").
#[derive(Debug, Clone, Default)]
pub struct CompiledOutcome {
    pub result_sets: Vec<ResultSet>,
    pub rows_affected: u64,
    pub error: Option<String>,
}

/// A compiled plugin calls this to run its procedure's source through
/// the host's own interpreter rather than containing translated logic
/// itself (see `aul::jit::manager` for why: codegen from arbitrary T-SQL
/// is out of scope, but a plugin that never calls back into the host
/// would either have to reimplement the interpreter or fabricate
/// answers). `host_ctx` is an opaque pointer the host supplies and
/// interprets; the plugin must treat it as a black box and pass it
/// straight through to whichever callback it was given.
pub type HostCallback = unsafe extern "C" fn(
    host_ctx: *mut std::os::raw::c_void,
    sql_ptr: *const u8,
    sql_len: usize,
) -> *mut CompiledOutcome;

/// The signature every compiled plugin exports under [`EXPORTED_SYMBOL`].
/// `extern "C"` so the symbol is callable across the dylib boundary
/// without relying on Rust ABI stability between independently-built
/// host and plugin binaries.
pub type CompiledFn = unsafe extern "C" fn(
    params: *const CompiledParams,
    host_ctx: *mut std::os::raw::c_void,
    host_callback: HostCallback,
) -> *mut CompiledOutcome;

/// Name of the exported symbol every JIT-compiled plugin must define.
pub const EXPORTED_SYMBOL: &[u8] = b"aul_execute";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_result_defaults_to_zero_rows() {
        let r = ExecResult::default();
        assert_eq!(r.rows_affected, 0);
        assert_eq!(r.last_insert_id, None);
    }
}
