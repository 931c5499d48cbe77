//! Compile workspace synthesis.
//!
//! For each compile, a private build workspace directory named
//! `safe_package_name(qualifiedName) + "_" + sourceHash[0..8]` is
//! materialised with a generated `Cargo.toml` (a `path` dependency onto
//! the host's `aul-jit-abi` crate, so host and plugin compile against the
//! identical ABI source) and a generated `lib.rs` exporting `aul_execute`.

use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::jit::sanitize::safe_package_name;

pub fn workspace_dir(base: &Path, qualified_name: &str, source_hash: &str) -> PathBuf {
    let prefix = &source_hash[..source_hash.len().min(8)];
    base.join(format!("{}_{}", safe_package_name(qualified_name), prefix))
}

/// Write the synthesized crate (`Cargo.toml` + `src/lib.rs`) for one
/// compile into `dir`, returning the path `cargo build` should be
/// invoked against.
pub fn write_workspace(
    dir: &Path,
    abi_crate_path: &Path,
    qualified_name: &str,
    body_rust_source: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir.join("src"))?;

    let manifest = format!(
        r#"[package]
name = "compiled-{pkg}"
version = "0.0.0"
edition = "2021"
publish = false

[lib]
crate-type = ["cdylib"]

[dependencies]
aul-jit-abi = {{ path = {abi_path:?} }}
"#,
        pkg = safe_package_name(qualified_name),
        abi_path = abi_crate_path,
    );
    std::fs::write(dir.join("Cargo.toml"), manifest)?;

    let lib_rs = format!(
        r#"// Generated for {qualified_name}. Do not edit; regenerated on every compile.
use std::os::raw::c_void;

use aul_jit_abi::{{CompiledOutcome, CompiledParams, HostCallback}};

#[no_mangle]
pub unsafe extern "C" fn aul_execute(
    params: *const CompiledParams,
    host_ctx: *mut c_void,
    host_callback: HostCallback,
) -> *mut CompiledOutcome {{
{body}
}}
"#,
        qualified_name = qualified_name,
        body = body_rust_source,
    );
    std::fs::write(dir.join("src").join("lib.rs"), lib_rs)?;

    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn workspace_dir_is_stable_per_hash_prefix() {
        let base = Path::new("/jit");
        let a = workspace_dir(base, "dbo.GetCustomer", "abcdef0123456789");
        let b = workspace_dir(base, "dbo.GetCustomer", "abcdef0199999999");
        assert_eq!(a, b, "first 8 hex chars of hash determine the dir");
    }

    #[test]
    fn write_workspace_produces_manifest_and_lib() {
        let dir = tempdir().unwrap();
        let ws = dir.path().join("ws");
        write_workspace(
            &ws,
            Path::new("/host/aul-jit-abi"),
            "dbo.GetCustomer",
            "    std::ptr::null_mut()",
        )
        .unwrap();
        assert!(ws.join("Cargo.toml").exists());
        assert!(ws.join("src/lib.rs").exists());
        let manifest = std::fs::read_to_string(ws.join("Cargo.toml")).unwrap();
        assert!(manifest.contains("aul-jit-abi"));
    }
}
