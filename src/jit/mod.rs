//! JIT compilation manager (C4).

pub mod abi;
pub mod manager;
pub mod sanitize;
pub mod workspace;

pub use manager::{JitManager, JitManagerConfig, JitState, JitStatus, LoadedPlugin};
pub use sanitize::{safe_package_name, safe_rust_ident};
