//! TLS mode negotiation and acceptor construction (spec §3's three
//! handshake modes: strict, classic, login-only).

use std::fs;
use std::path::Path;

use native_tls::{Certificate, Identity, TlsAcceptor as NativeAcceptor};

/// How TDS negotiates TLS during PRELOGIN (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TLSMode {
    /// TLS never offered; PRELOGIN always answers `not-supported`.
    Disable,
    /// TLS offered; client may accept or decline.
    Allow,
    /// TLS required for the whole session.
    Require,
    /// TLS required and the server certificate is checked against `ca_cert`.
    VerifyFull,
}

impl TLSMode {
    pub fn from_string(s: &str) -> Result<TLSMode, String> {
        match s.to_lowercase().as_str() {
            "disable" | "off" => Ok(TLSMode::Disable),
            "allow" | "on" => Ok(TLSMode::Allow),
            "require" => Ok(TLSMode::Require),
            "verify-full" => Ok(TLSMode::VerifyFull),
            other => Err(format!("unknown tls_mode: {other}")),
        }
    }
}

/// Build a [`tokio_native_tls::TlsAcceptor`] from a cert/key pair, used by
/// every protocol listener that negotiates TLS (spec §3, §6).
pub fn build_acceptor(
    cert_path: &Path,
    key_path: &Path,
    ca_cert: Option<String>,
    tls_mode: Option<String>,
) -> Result<tokio_native_tls::TlsAcceptor, String> {
    if let Some(mode) = &tls_mode {
        let parsed = TLSMode::from_string(mode)?;
        if parsed == TLSMode::VerifyFull && ca_cert.is_none() {
            return Err("tls_mode=verify-full requires tls_ca_cert".to_string());
        }
    }

    let cert_pem = fs::read(cert_path).map_err(|e| format!("reading {cert_path:?}: {e}"))?;
    let key_pem = fs::read(key_path).map_err(|e| format!("reading {key_path:?}: {e}"))?;
    let identity = Identity::from_pkcs8(&cert_pem, &key_pem).map_err(|e| format!("parsing certificate/key: {e}"))?;

    let mut builder = NativeAcceptor::builder(identity);
    if let Some(ca_path) = ca_cert {
        let ca_pem = fs::read(&ca_path).map_err(|e| format!("reading {ca_path}: {e}"))?;
        let ca = Certificate::from_pem(&ca_pem).map_err(|e| format!("parsing CA certificate: {e}"))?;
        builder.add_root_certificate(ca);
    }

    let acceptor = builder.build().map_err(|e| format!("building TLS acceptor: {e}"))?;
    Ok(tokio_native_tls::TlsAcceptor::from(acceptor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes() {
        assert_eq!(TLSMode::from_string("require").unwrap(), TLSMode::Require);
        assert_eq!(TLSMode::from_string("VERIFY-FULL").unwrap(), TLSMode::VerifyFull);
        assert!(TLSMode::from_string("bogus").is_err());
    }

    #[test]
    fn verify_full_without_ca_cert_is_rejected() {
        let err = build_acceptor(
            Path::new("/nonexistent-cert.pem"),
            Path::new("/nonexistent-key.pem"),
            None,
            Some("verify-full".to_string()),
        )
        .unwrap_err();
        assert!(err.contains("tls_ca_cert"));
    }
}
