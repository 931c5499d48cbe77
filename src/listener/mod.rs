//! Protocol accept loops (C1 host, spec §8). Each enabled wire protocol
//! gets one bind/accept/spawn-per-connection loop shaped after the
//! teacher's `app::server::run_server` (TcpSocket tuning, SIGTERM/SIGINT
//! for graceful shutdown, one task per client) with the daemon/binary
//! upgrade/core-affinity machinery that loop also carried dropped, since
//! this host doesn't support any of those.
//!
//! TDS is the only protocol implemented end to end; Postgres/MySQL/
//! HTTP/gRPC are represented only by [`Listener`] itself, the seam a
//! future implementation of each plugs into.

pub mod tds_conn;
pub mod transport;

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
#[cfg(not(windows))]
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::net::TcpSocket;
use socket2::SockRef;

use crate::errors::Result;
use crate::runtime::Runtime;

/// Global count of clients currently connected, across every listener.
pub static CURRENT_CLIENT_COUNT: AtomicI64 = AtomicI64::new(0);

/// A single protocol's accept loop. `TdsListener` is the only concrete
/// implementation today; a Postgres/MySQL/HTTP/gRPC listener would
/// implement this the same way, bind its own port, and get spawned
/// alongside it from `main`.
#[async_trait::async_trait]
pub trait Listener: Send + Sync {
    /// Human-readable protocol name, used only in log lines.
    fn name(&self) -> &'static str;

    /// Bind and serve forever (or until the process receives a shutdown
    /// signal). Returns once the listener's socket is closed.
    async fn serve(self: Arc<Self>) -> Result<()>;
}

pub struct TdsListener {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub runtime: Arc<Runtime>,
    pub tls: tds_conn::TdsTlsConfig,
    next_session_id: AtomicU64,
}

impl TdsListener {
    pub fn new(host: String, port: u16, backlog: u32, runtime: Arc<Runtime>, tls: tds_conn::TdsTlsConfig) -> Self {
        TdsListener {
            host,
            port,
            backlog,
            runtime,
            tls,
            next_session_id: AtomicU64::new(1),
        }
    }

    fn bind(&self) -> std::io::Result<tokio::net::TcpListener> {
        let addr = format!("{}:{}", self.host, self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no socket address resolved"))?;

        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_reuseaddr(true)?;
        #[cfg(not(windows))]
        socket.set_reuseport(true)?;
        socket.set_nodelay(true)?;
        {
            let sock_ref = SockRef::from(&socket);
            sock_ref.set_linger(Some(Duration::from_secs(0)))?;
        }
        socket.bind(addr)?;
        let backlog = if self.backlog > 0 { self.backlog } else { 1024 };
        socket.listen(backlog)
    }
}

#[async_trait::async_trait]
impl Listener for TdsListener {
    fn name(&self) -> &'static str {
        "tds"
    }

    async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = self.bind()?;
        info!("tds listener running on {}:{}", self.host, self.port);

        #[cfg(not(windows))]
        let mut term_signal = unix_signal(SignalKind::terminate()).expect("install SIGTERM handler");
        #[cfg(not(windows))]
        let mut interrupt_signal = unix_signal(SignalKind::interrupt()).expect("install SIGINT handler");

        loop {
            #[cfg(not(windows))]
            let accepted = tokio::select! {
                _ = term_signal.recv() => {
                    info!("tds listener: got SIGTERM, shutting down");
                    return Ok(());
                }
                _ = interrupt_signal.recv() => {
                    info!("tds listener: got SIGINT, shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };
            #[cfg(windows)]
            let accepted = listener.accept().await;

            {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!("tds listener: accept error: {err}");
                        continue;
                    }
                };
                let _ = socket.set_nodelay(true);

                let runtime = self.runtime.clone();
                let tls = self.tls.clone();
                let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

                tokio::task::spawn(async move {
                    CURRENT_CLIENT_COUNT.fetch_add(1, Ordering::SeqCst);
                    if let Err(err) = tds_conn::handle_connection(socket, peer, runtime, tls, session_id).await {
                        warn!("tds connection {peer}: closed with error: {err}");
                    }
                    CURRENT_CLIENT_COUNT.fetch_add(-1, Ordering::SeqCst);
                });
            }
        }
    }
}
