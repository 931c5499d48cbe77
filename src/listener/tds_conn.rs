//! Per-connection TDS session: handshake (sniff -> PRELOGIN/LOGIN7 ->
//! LOGINACK) followed by the request/response loop, mirroring the shape
//! of the teacher's `client::client_entrypoint` (one task per accepted
//! socket, login then a read-dispatch-write loop) generalized from the
//! Postgres wire protocol to TDS.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::net::TcpStream;

use crate::errors::{Error, Result};
use crate::runtime::{ExecContext, Runtime};
use crate::tds::framing::{self, status, PacketType};
use crate::tds::login::{self, EncryptionOption};
use crate::tds::request::{self, Request};
use crate::tds::tls::{self, HandshakeMode};
use crate::tds::token;
use crate::listener::transport::{BoxedStream, Reverted};

/// Negotiated packet size used for the rest of the session once
/// `LOGIN7` completes. TDS clients default to 4KB unless a larger size
/// is negotiated; nothing in this server needs more.
const NEGOTIATED_PACKET_SIZE: usize = 4096;

const SERVER_NAME: &str = "aul";
const SERVER_VERSION: [u8; 4] = [0, 1, 0, 0];

#[derive(Clone)]
pub struct TdsTlsConfig {
    pub acceptor: Option<tokio_native_tls::TlsAcceptor>,
    pub mode: Option<crate::config::tls::TLSMode>,
    pub rate_limiter: Option<crate::rate_limit::RateLimiter>,
}

/// Throttle TLS handshakes if a rate limit is configured. Plaintext
/// connections never pay this cost.
async fn throttle_handshake(tls: &TdsTlsConfig) {
    if let Some(limiter) = &tls.rate_limiter {
        limiter.wait().await;
    }
}

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    runtime: Arc<Runtime>,
    tls: TdsTlsConfig,
    session_id: u64,
) -> Result<()> {
    let (mode, prefixed) = tls::sniff(stream).await?;

    let mut transport: BoxedStream = match mode {
        HandshakeMode::Rejected(b) => {
            warn!("connection {peer}: unrecognized handshake byte 0x{b:02x}, closing");
            return Err(Error::ProtocolError {
                reason: format!("unrecognized TDS handshake byte 0x{b:02x}"),
                ctx: Default::default(),
            });
        }
        HandshakeMode::Strict => {
            let acceptor = tls.acceptor.clone().ok_or_else(|| Error::TlsFailed {
                reason: "client requested TDS 8.0 strict TLS but no certificate is configured".into(),
                ctx: Default::default(),
            })?;
            throttle_handshake(&tls).await;
            let tls_stream = acceptor.accept(prefixed).await.map_err(|e| Error::TlsFailed {
                reason: e.to_string(),
                ctx: Default::default(),
            })?;
            Box::new(tls_stream)
        }
        HandshakeMode::Classic => negotiate_classic(prefixed, &tls).await?,
    };

    let (login7, database) = perform_login(&mut transport, session_id).await?;
    debug!("connection {peer}: login as {:?} to {database}", login7.username);

    let mut ctx = ExecContext::new(session_id, database, login7.username.clone());
    serve_requests(&mut transport, &runtime, &mut ctx, peer).await
}

/// Classic-mode PRELOGIN negotiation: read PRELOGIN, decide the
/// ENCRYPTION answer, respond, and either upgrade to TLS, detect the
/// login-only quirk, or continue in cleartext.
async fn negotiate_classic(
    mut prefixed: crate::tds::tls::Prefixed<TcpStream>,
    tls: &TdsTlsConfig,
) -> Result<BoxedStream> {
    let (packet_type, payload) = framing::read_message(&mut prefixed).await?;
    if packet_type != PacketType::PreLogin {
        return Err(Error::ProtocolError {
            reason: format!("expected PRELOGIN, got {packet_type:?}"),
            ctx: Default::default(),
        });
    }
    let client_prelogin = login::parse_prelogin(&payload)?;
    let answer = tls::decide_classic_encryption(tls.mode, client_prelogin.encryption, tls.acceptor.is_some());

    let response = login::build_prelogin_response([9, 0, 0, 0, 0, 0], answer, false);
    framing::write_message(&mut prefixed, PacketType::PreLogin, 0, &response, NEGOTIATED_PACKET_SIZE).await?;

    match answer {
        EncryptionOption::On | EncryptionOption::Required => {
            let acceptor = tls.acceptor.clone().ok_or_else(|| Error::TlsFailed {
                reason: "answered PRELOGIN with encryption on but no acceptor is configured".into(),
                ctx: Default::default(),
            })?;
            throttle_handshake(tls).await;
            let tls_stream = acceptor.accept(prefixed).await.map_err(|e| Error::TlsFailed {
                reason: e.to_string(),
                ctx: Default::default(),
            })?;
            Ok(Box::new(tls_stream))
        }
        EncryptionOption::Off | EncryptionOption::NotSupported => detect_login_only(prefixed, tls).await,
    }
}

/// After answering PRELOGIN with encryption off, some classic-mode
/// drivers still wrap only `LOGIN7` in TLS. Peek the next byte: a bare
/// TLS handshake record means the quirk is in play, so perform the TLS
/// handshake, read `LOGIN7` through it, then revert to cleartext for
/// everything after (`LOGINACK` onward is never encrypted in this mode).
async fn detect_login_only(
    prefixed: crate::tds::tls::Prefixed<TcpStream>,
    tls: &TdsTlsConfig,
) -> Result<BoxedStream> {
    let (mode, reprefixed) = tls::sniff(prefixed).await?;
    match mode {
        HandshakeMode::Strict => {
            let acceptor = tls.acceptor.clone().ok_or_else(|| Error::TlsFailed {
                reason: "login-only TLS quirk detected but no certificate is configured".into(),
                ctx: Default::default(),
            })?;
            throttle_handshake(tls).await;
            let tls_stream = acceptor.accept(reprefixed).await.map_err(|e| Error::TlsFailed {
                reason: e.to_string(),
                ctx: Default::default(),
            })?;
            Ok(Box::new(Reverted(tls_stream)))
        }
        _ => Ok(Box::new(reprefixed)),
    }
}

async fn perform_login(transport: &mut BoxedStream, spid: u64) -> Result<(login::Login7, String)> {
    let (packet_type, payload) = framing::read_message(transport).await?;
    if packet_type != PacketType::Login7 {
        return Err(Error::ProtocolError {
            reason: format!("expected LOGIN7, got {packet_type:?}"),
            ctx: Default::default(),
        });
    }
    let login7 = login::parse_login7(&payload)?;
    let database = if login7.database.is_empty() {
        "master".to_string()
    } else {
        login7.database.clone()
    };
    let spid = spid as u16;

    let mut response = Vec::new();
    response.extend_from_slice(&token::encode_envchange_string(1, "", &database));
    response.extend_from_slice(&token::encode_envchange_packet_size(2048, NEGOTIATED_PACKET_SIZE as u32));
    response.extend_from_slice(&token::encode_loginack(SERVER_NAME, SERVER_VERSION));
    response.extend_from_slice(&token::encode_done(status::EOM as u16, 0, spid));

    framing::write_message(transport, PacketType::TabularResult, spid, &response, NEGOTIATED_PACKET_SIZE).await?;
    Ok((login7, database))
}

/// The request/response loop: one `SQL_BATCH`/`RPC_REQUEST`/`ATTENTION`
/// message per iteration, dispatched to the runtime and answered with
/// the matching token stream (spec §4.1 response encoding).
async fn serve_requests(
    transport: &mut BoxedStream,
    runtime: &Runtime,
    ctx: &mut ExecContext,
    peer: SocketAddr,
) -> Result<()> {
    let spid = ctx.session_id as u16;
    loop {
        let (packet_type, payload) = match framing::read_message(transport).await {
            Ok(m) => m,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("connection {peer}: client closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let req = match request::classify(packet_type, &payload) {
            Ok(req) => req,
            Err(err) => {
                let body = token::encode_error(&err, spid);
                framing::write_message(transport, PacketType::TabularResult, spid, &body, NEGOTIATED_PACKET_SIZE).await?;
                continue;
            }
        };

        match req {
            Request::Query { sql } => run_batch(transport, runtime, ctx, &sql, spid).await?,
            Request::QueryWithParams { sql, params } => {
                let bound = crate::runtime::bind_positional_params(&sql, &params);
                run_batch(transport, runtime, ctx, &bound, spid).await?
            }
            Request::Exec { name, params } => run_exec(transport, runtime, ctx, &name, params, spid).await?,
            Request::Cancel => {
                let body = token::encode_done(status::EOM as u16 | 0x20, 0, spid);
                framing::write_message(transport, PacketType::TabularResult, spid, &body, NEGOTIATED_PACKET_SIZE).await?;
            }
            other => {
                let err = Error::NotImplemented {
                    what: format!("RPC operation {other:?}"),
                    ctx: Default::default(),
                };
                let body = token::encode_error(&err, spid);
                framing::write_message(transport, PacketType::TabularResult, spid, &body, NEGOTIATED_PACKET_SIZE).await?;
            }
        }
    }
}

/// Runs a named-procedure `RPC_REQUEST` (`Request::Exec`): binds the
/// positional parameters to synthetic `p1, p2, …` names (spec §4.3) and
/// encodes the outcome the same way a `SQL_BATCH` response is encoded.
async fn run_exec(
    transport: &mut BoxedStream,
    runtime: &Runtime,
    ctx: &mut ExecContext,
    name: &str,
    params: Vec<aul_jit_abi::Value>,
    spid: u16,
) -> Result<()> {
    let named = params
        .into_iter()
        .enumerate()
        .map(|(i, v)| (format!("p{}", i + 1), v))
        .collect();
    let body = match runtime.execute(ctx, name, named) {
        Ok(outcome) => {
            let mut buf = Vec::new();
            for rs in &outcome.result_sets {
                buf.extend_from_slice(&token::encode_result_set(rs));
                buf.extend_from_slice(&token::encode_doneinproc(
                    token::done_status::COUNT,
                    rs.rows.len() as u64,
                    0,
                ));
            }
            for (ordinal, (pname, value)) in outcome.output_params.iter().enumerate() {
                buf.extend_from_slice(&token::encode_returnvalue(ordinal as u16, pname, value));
            }
            buf.extend_from_slice(&token::encode_doneproc(
                (status::EOM as u16) | token::done_status::COUNT,
                outcome.rows_affected,
                spid,
            ));
            buf
        }
        Err(err) => token::encode_error(&err, spid),
    };
    framing::write_message(transport, PacketType::TabularResult, spid, &body, NEGOTIATED_PACKET_SIZE).await
}

async fn run_batch(
    transport: &mut BoxedStream,
    runtime: &Runtime,
    ctx: &mut ExecContext,
    sql: &str,
    spid: u16,
) -> Result<()> {
    let body = match runtime.execute_batch(ctx, sql) {
        Ok(outcome) => {
            let mut buf = Vec::new();
            for rs in &outcome.result_sets {
                buf.extend_from_slice(&token::encode_result_set(rs));
                buf.extend_from_slice(&token::encode_doneinproc(
                    token::done_status::COUNT,
                    rs.rows.len() as u64,
                    0,
                ));
            }
            for (ordinal, (name, value)) in outcome.output_params.iter().enumerate() {
                buf.extend_from_slice(&token::encode_returnvalue(ordinal as u16, name, value));
            }
            buf.extend_from_slice(&token::encode_done(
                (status::EOM as u16) | token::done_status::COUNT,
                outcome.rows_affected,
                spid,
            ));
            buf
        }
        Err(err) => token::encode_error(&err, spid),
    };
    framing::write_message(transport, PacketType::TabularResult, spid, &body, NEGOTIATED_PACKET_SIZE).await
}
