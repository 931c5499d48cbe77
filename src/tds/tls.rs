//! The three TDS TLS handshake modes (spec §4.1): strict (TDS 8.0, raw
//! TLS before any TDS framing), classic (TDS 7.x, TLS negotiated inside
//! `PRELOGIN` and wrapped in TDS packets), and the login-only quirk some
//! classic-mode drivers use (TLS only around `LOGIN7`, reverted to
//! cleartext before `LOGINACK`). Builds on `native-tls`/`tokio-native-tls`
//! the same way `app::tls` does for the other protocols, generalized
//! from "one acceptor, one mode" to the per-byte mode sniff TDS requires.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::config::tls::TLSMode;
use crate::errors::{Error, ErrorContext, Result};
use crate::tds::login::EncryptionOption;

/// The mode a connection's first byte reveals, sniffed before any TDS
/// framing is assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    /// First byte `0x16`: a bare TLS record, TDS 8.0 "strict" encryption.
    Strict,
    /// First byte `0x12`: a `PRELOGIN` TDS packet, classic negotiation.
    Classic,
    /// Anything else: not a TDS client this server understands.
    Rejected(u8),
}

const TLS_HANDSHAKE_RECORD: u8 = 0x16;
const PRELOGIN_PACKET_TYPE: u8 = 0x12;

pub fn classify_first_byte(b: u8) -> HandshakeMode {
    match b {
        TLS_HANDSHAKE_RECORD => HandshakeMode::Strict,
        PRELOGIN_PACKET_TYPE => HandshakeMode::Classic,
        other => HandshakeMode::Rejected(other),
    }
}

/// Wraps a stream whose first bytes have already been consumed for
/// sniffing, replaying them before reads resume from the inner stream.
/// Needed because `AsyncRead` gives no generic peek; the listener reads
/// one byte to classify the connection, then must hand that byte back.
pub struct Prefixed<S> {
    prefix: Vec<u8>,
    prefix_pos: usize,
    inner: S,
}

impl<S> Prefixed<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        Prefixed { prefix, prefix_pos: 0, inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Prefixed<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.prefix_pos < this.prefix.len() {
            let remaining = &this.prefix[this.prefix_pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.prefix_pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Prefixed<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Read the connection's first byte without losing it, returning the
/// sniffed mode and a [`Prefixed`] stream that replays it.
pub async fn sniff<S: AsyncRead + Unpin>(mut stream: S) -> Result<(HandshakeMode, Prefixed<S>)> {
    let mut first = [0u8; 1];
    stream.read_exact(&mut first).await.map_err(Error::Io)?;
    let mode = classify_first_byte(first[0]);
    Ok((mode, Prefixed::new(first.to_vec(), stream)))
}

/// Decide the classic-mode `PRELOGIN` ENCRYPTION answer per spec §4.1:
/// client `on`/`require` with TLS configured server-side answers `on`;
/// client `off` answers `off` regardless of server configuration;
/// anything else (client requires TLS the server can't offer, or the
/// server has no certificate configured) answers `not-supported`.
pub fn decide_classic_encryption(
    tls_mode: Option<TLSMode>,
    client: EncryptionOption,
    server_tls_configured: bool,
) -> EncryptionOption {
    match client {
        EncryptionOption::Off => EncryptionOption::Off,
        EncryptionOption::On | EncryptionOption::Required => {
            if server_tls_configured && !matches!(tls_mode, Some(TLSMode::Disable)) {
                EncryptionOption::On
            } else {
                EncryptionOption::NotSupported
            }
        }
        EncryptionOption::NotSupported => EncryptionOption::NotSupported,
    }
}

/// After answering `off` in classic mode, some drivers still wrap only
/// `LOGIN7` in TLS (the "login-only" quirk). Detected the same way the
/// strict/classic split is: peek whether the next payload starts with a
/// bare TLS handshake record instead of a TDS `LOGIN7` packet type byte.
pub fn is_login_only_tls(next_byte: u8) -> bool {
    next_byte == TLS_HANDSHAKE_RECORD
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnrecognizedFirstByte(u8),
}

pub fn reject_reason(mode: HandshakeMode) -> Option<RejectReason> {
    match mode {
        HandshakeMode::Rejected(b) => Some(RejectReason::UnrecognizedFirstByte(b)),
        _ => None,
    }
}

pub fn protocol_error_for_reject(reason: RejectReason) -> Error {
    let RejectReason::UnrecognizedFirstByte(b) = reason;
    Error::ProtocolError {
        reason: format!("connection did not start with a recognized TDS handshake byte: 0x{b:02x}"),
        ctx: ErrorContext::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn sniffs_strict_mode() {
        let (mode, mut prefixed) = sniff(Cursor::new(vec![0x16, 0x03, 0x01])).await.unwrap();
        assert_eq!(mode, HandshakeMode::Strict);
        let mut buf = [0u8; 3];
        prefixed.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x16, 0x03, 0x01]);
    }

    #[tokio::test]
    async fn sniffs_classic_mode() {
        let (mode, _) = sniff(Cursor::new(vec![0x12, 0x01])).await.unwrap();
        assert_eq!(mode, HandshakeMode::Classic);
    }

    #[test]
    fn classic_encryption_off_wins_regardless_of_server() {
        assert_eq!(
            decide_classic_encryption(Some(TLSMode::Require), EncryptionOption::Off, true),
            EncryptionOption::Off
        );
    }

    #[test]
    fn classic_encryption_on_without_server_cert_is_not_supported() {
        assert_eq!(
            decide_classic_encryption(None, EncryptionOption::On, false),
            EncryptionOption::NotSupported
        );
    }
}
