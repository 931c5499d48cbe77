//! Stream plumbing shared by every protocol listener: type erasure over
//! plain vs. TLS-wrapped sockets, plus the first-byte replay and
//! TLS-revert tricks the TDS handshake modes need (spec §4.1).

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Any duplex byte stream a connection handler can read/write without
/// caring whether it's plaintext or TLS.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Holds a `TlsStream` alive for its ownership of the socket while every
/// further read/write bypasses encryption, calling straight through to
/// the inner stream via [`tokio_native_tls::TlsStream::get_mut`]. This is
/// how the login-only TLS quirk reverts to cleartext before `LOGINACK`
/// without needing the `TlsStream` to give up ownership of the socket.
pub struct Reverted<S>(pub tokio_native_tls::TlsStream<S>);

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncRead for Reverted<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(self.get_mut().0.get_mut().get_mut().get_mut()).poll_read(cx, buf)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncWrite for Reverted<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(self.get_mut().0.get_mut().get_mut().get_mut()).poll_write(cx, buf)
    }
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(self.get_mut().0.get_mut().get_mut().get_mut()).poll_flush(cx)
    }
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(self.get_mut().0.get_mut().get_mut().get_mut()).poll_shutdown(cx)
    }
}
