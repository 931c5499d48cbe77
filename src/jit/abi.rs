//! Re-export of the host/plugin ABI boundary.
//!
//! The types themselves live in the standalone `aul-jit-abi` crate so
//! that a compiled plugin and this host link against the identical
//! compiled definition — see `aul-jit-abi/src/lib.rs` for the rationale.

pub use aul_jit_abi::{
    CompiledFn, CompiledOutcome, CompiledParams, ColumnInfo, ExecResult, HostCallback, ResultSet,
    Value, EXPORTED_SYMBOL,
};
