//! Identifier sanitisation: SQL procedure names may contain dots,
//! brackets, spaces, and other characters illegal in Rust identifiers.
//! `safe_rust_ident` replaces anything outside `[A-Za-z0-9_]` with `_`,
//! collapses underscore runs, prefixes an underscore if the result
//! starts with a digit, and appends an 8-hex-character fingerprint of
//! the *original* name so sanitisation collisions (`GetCustomer` vs
//! `Get_Customer` vs `[Get Customer]`) still produce distinct results.

use sha2::{Digest, Sha256};

fn fingerprint(original: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(original.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

fn collapse_and_clean(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for c in raw.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' };
        if mapped == '_' {
            if !last_was_underscore {
                out.push('_');
            }
            last_was_underscore = true;
        } else {
            out.push(mapped);
            last_was_underscore = false;
        }
    }
    out
}

/// Sanitise `qualified_name` into a valid, collision-resistant Rust
/// identifier suffixed with an 8-hex-character fingerprint.
pub fn safe_rust_ident(qualified_name: &str) -> String {
    let mut cleaned = collapse_and_clean(qualified_name);
    if cleaned.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        cleaned.insert(0, '_');
    }
    if cleaned.is_empty() {
        cleaned.push('_');
    }
    format!("{cleaned}_{}", fingerprint(qualified_name))
}

/// Same as [`safe_rust_ident`] but lowercased, suitable for use as a
/// crate/package name.
pub fn safe_package_name(qualified_name: &str) -> String {
    safe_rust_ident(qualified_name).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_inputs_never_collide_after_cleaning() {
        let a = safe_rust_ident("GetCustomer");
        let b = safe_rust_ident("Get_Customer");
        let c = safe_rust_ident("[Get Customer]");
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(safe_rust_ident("dbo.GetCustomer"), safe_rust_ident("dbo.GetCustomer"));
    }

    #[test]
    fn digit_prefixed_result_gets_underscore() {
        let id = safe_rust_ident("123abc");
        assert!(!id.chars().next().unwrap().is_ascii_digit());
    }

    #[test]
    fn package_name_is_lowercase() {
        let pkg = safe_package_name("Dbo.GetCustomer");
        assert_eq!(pkg, pkg.to_lowercase());
    }
}
