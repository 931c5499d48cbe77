//! End-to-end smoke test over a real socket: bind a `TdsListener`, run
//! the classic PRELOGIN/LOGIN7 handshake with encryption off, then send
//! a `SQL_BATCH` and check the response comes back as a token stream
//! rather than an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use aul::jit::JitManager;
use aul::listener::{tds_conn::TdsTlsConfig, Listener, TdsListener};
use aul::registry::ProcedureRegistry;
use aul::runtime::{Runtime, RuntimeConfig};
use aul::storage::{Pragmas, StorageLayer, TenantStorageConfig};
use aul::tds::framing::{read_message, write_message, PacketType};
use aul::tds::login::{build_prelogin_response, EncryptionOption};

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

/// Builds a minimal but well-formed `LOGIN7` payload: a 94-byte fixed
/// header (only the fields this server reads are populated) followed by
/// the UTF-16LE variable data it points into.
fn build_login7(username: &str, app_name: &str, database: &str) -> Vec<u8> {
    const HEADER_LEN: usize = 94;
    let mut header = vec![0u8; HEADER_LEN];
    header[4..8].copy_from_slice(&0x74000004u32.to_be_bytes());

    let mut data = Vec::new();
    let mut put_field = |offset_pos: usize, header: &mut Vec<u8>, text: &str| {
        let bytes = utf16le(text);
        let offset = HEADER_LEN + data.len();
        header[offset_pos..offset_pos + 2].copy_from_slice(&(offset as u16).to_le_bytes());
        header[offset_pos + 2..offset_pos + 4].copy_from_slice(&(text.encode_utf16().count() as u16).to_le_bytes());
        data.extend_from_slice(&bytes);
    };

    put_field(40, &mut header, username);
    put_field(48, &mut header, app_name);
    put_field(68, &mut header, database);

    header.extend_from_slice(&data);
    header
}

async fn spawn_listener() -> (Arc<TdsListener>, u16, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ProcedureRegistry::new(dir.path().join("procedures")));
    registry.load_all().unwrap();

    let storage = Arc::new(StorageLayer::new(TenantStorageConfig {
        base_dir: dir.path().join("tenants"),
        auto_create: true,
        pragmas: Pragmas::default(),
        pool_size: 2,
    }));

    let runtime_config = RuntimeConfig {
        delegation_enabled: true,
        jit_enabled: false,
        default_jit_threshold: 50,
        default_timeout: Duration::from_secs(5),
    };
    let runtime = Arc::new(Runtime::new(
        registry,
        storage,
        Option::<Arc<JitManager>>::None,
        runtime_config,
    ));

    let port = portpicker::pick_unused_port().expect("no free port for test listener");
    let listener = Arc::new(TdsListener::new(
        "127.0.0.1".to_string(),
        port,
        128,
        runtime,
        TdsTlsConfig { acceptor: None, mode: None, rate_limiter: None },
    ));

    let spawned = listener.clone();
    tokio::task::spawn(async move {
        let _ = spawned.serve().await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (listener, port, dir)
}

#[tokio::test]
async fn classic_handshake_and_select_round_trip() {
    let (_listener, port, _dir) = spawn_listener().await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");

    let prelogin = build_prelogin_response([9, 0, 0, 0, 0, 0], EncryptionOption::Off, false);
    write_message(&mut stream, PacketType::PreLogin, 0, &prelogin, 4096).await.unwrap();

    let (kind, _payload) = read_message(&mut stream).await.unwrap();
    assert_eq!(kind, PacketType::PreLogin);

    let login7 = build_login7("tester", "aul-smoke-test", "master");
    write_message(&mut stream, PacketType::Login7, 0, &login7, 4096).await.unwrap();

    let (kind, payload) = read_message(&mut stream).await.unwrap();
    assert_eq!(kind, PacketType::TabularResult);
    assert!(payload.contains(&0xAD), "expected a LOGINACK token in the login response");

    let batch = utf16le("SELECT 1");
    write_message(&mut stream, PacketType::SqlBatch, 0, &batch, 4096).await.unwrap();

    let (kind, payload) = read_message(&mut stream).await.unwrap();
    assert_eq!(kind, PacketType::TabularResult);
    assert_ne!(payload.first(), Some(&0xAAu8), "batch response came back as an ERROR token: {payload:?}");
    assert!(payload.contains(&0xFD) || payload.contains(&0xFF), "expected a DONE/DONEINPROC token");
}
