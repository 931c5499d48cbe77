//! General server settings: listeners, storage, JIT, execution defaults.

use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;

use super::byte_size::ByteSize;
use super::duration::Duration;
use super::Include;

/// Top-level server configuration (spec §6's CLI/config surface).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct General {
    #[serde(default = "General::default_host")]
    pub host: String,

    /// Root directory the procedure registry watches (spec §4.1).
    #[serde(default = "General::default_procedure_dir")]
    pub procedure_dir: PathBuf,

    /// Enable the filesystem watcher for hot reload (spec §4.1, "Hot reload").
    #[serde(default)] // false
    pub watch: bool,

    /// TDS listen port. 0 disables the protocol.
    #[serde(default = "General::default_listen_tds")]
    pub listen_tds: u16,
    /// PostgreSQL wire-protocol listen port. 0 disables.
    #[serde(default)] // 0 = disabled
    pub listen_postgres: u16,
    /// MySQL wire-protocol listen port. 0 disables.
    #[serde(default)] // 0 = disabled
    pub listen_mysql: u16,
    /// HTTP collaborator listen port. 0 disables.
    #[serde(default)] // 0 = disabled
    pub listen_http: u16,
    /// gRPC collaborator listen port. 0 disables.
    #[serde(default)] // 0 = disabled
    pub listen_grpc: u16,

    /// Default SQL dialect used when a procedure's source doesn't imply
    /// one (currently only `tsql` is interpreted).
    #[serde(default = "General::default_dialect")]
    pub default_dialect: String,

    #[serde(default = "General::default_jit_enabled")]
    pub jit_enabled: bool,
    #[serde(default = "General::default_jit_threshold")]
    pub jit_threshold: i64,

    #[serde(default = "General::default_max_connections")]
    pub max_connections: u64,

    #[serde(default = "General::default_execution_timeout")]
    pub default_execution_timeout: Duration,

    /// Storage backend kind. Only `sqlite` is implemented.
    #[serde(default = "General::default_storage_type")]
    pub storage_type: String,
    #[serde(default = "General::default_storage_path")]
    pub storage_path: PathBuf,
    /// SQLite page cache size per connection, applied as `PRAGMA
    /// cache_size` (spec §4.5). Accepts human-readable suffixes
    /// (`"2MB"`) as well as plain numbers for backward compatibility.
    #[serde(default = "General::default_sqlite_cache_size")]
    pub sqlite_cache_size: ByteSize,

    #[serde(default = "General::default_log_level")]
    pub log_level: String,
    #[serde(default = "General::default_log_format")]
    pub log_format: String,
    pub syslog_prog_name: Option<String>,

    #[serde(default = "General::default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "General::default_tcp_keepalives_idle")]
    pub tcp_keepalives_idle: u64,
    #[serde(default = "General::default_tcp_keepalives_count")]
    pub tcp_keepalives_count: u32,
    #[serde(default = "General::default_tcp_keepalives_interval")]
    pub tcp_keepalives_interval: u64,
    #[serde(default = "General::default_tcp_no_delay")]
    pub tcp_no_delay: bool,
    #[serde(default = "General::default_backlog")]
    pub backlog: u32,

    #[serde(default = "General::default_shutdown_timeout")]
    pub shutdown_timeout: u64,
    #[serde(default = "General::default_worker_threads")]
    pub worker_threads: usize,

    pub tls_certificate: Option<String>,
    pub tls_private_key: Option<String>,
    pub tls_ca_cert: Option<String>,
    pub tls_mode: Option<String>,
    #[serde(default = "General::default_tls_rate_limit_per_second")]
    pub tls_rate_limit_per_second: usize,
}

impl General {
    pub fn default_host() -> String {
        "0.0.0.0".into()
    }

    pub fn default_procedure_dir() -> PathBuf {
        PathBuf::from("./procedures")
    }

    pub fn default_listen_tds() -> u16 {
        1433
    }

    pub fn default_dialect() -> String {
        "tsql".into()
    }

    pub fn default_jit_enabled() -> bool {
        true
    }

    pub fn default_jit_threshold() -> i64 {
        50
    }

    pub fn default_max_connections() -> u64 {
        1024
    }

    pub fn default_execution_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn default_storage_type() -> String {
        "sqlite".into()
    }

    pub fn default_storage_path() -> PathBuf {
        PathBuf::from("./data")
    }

    pub fn default_sqlite_cache_size() -> ByteSize {
        ByteSize::from_kb(2000)
    }

    pub fn default_log_level() -> String {
        "info".into()
    }

    pub fn default_log_format() -> String {
        "text".into()
    }

    pub fn default_connect_timeout() -> u64 {
        3_000
    }

    pub fn default_tcp_keepalives_idle() -> u64 {
        5
    }

    pub fn default_tcp_keepalives_count() -> u32 {
        5
    }

    pub fn default_tcp_keepalives_interval() -> u64 {
        5
    }

    pub fn default_tcp_no_delay() -> bool {
        true
    }

    pub fn default_backlog() -> u32 {
        0
    }

    pub fn default_shutdown_timeout() -> u64 {
        10_000
    }

    pub fn default_worker_threads() -> usize {
        4
    }

    pub fn default_tls_rate_limit_per_second() -> usize {
        0
    }

    pub fn default_include_files() -> Vec<String> {
        vec![]
    }

    pub fn default_include() -> Include {
        Include {
            files: Self::default_include_files(),
        }
    }
}

impl Default for General {
    fn default() -> General {
        General {
            host: Self::default_host(),
            procedure_dir: Self::default_procedure_dir(),
            watch: false,
            listen_tds: Self::default_listen_tds(),
            listen_postgres: 0,
            listen_mysql: 0,
            listen_http: 0,
            listen_grpc: 0,
            default_dialect: Self::default_dialect(),
            jit_enabled: Self::default_jit_enabled(),
            jit_threshold: Self::default_jit_threshold(),
            max_connections: Self::default_max_connections(),
            default_execution_timeout: Self::default_execution_timeout(),
            storage_type: Self::default_storage_type(),
            storage_path: Self::default_storage_path(),
            sqlite_cache_size: Self::default_sqlite_cache_size(),
            log_level: Self::default_log_level(),
            log_format: Self::default_log_format(),
            syslog_prog_name: None,
            connect_timeout: Self::default_connect_timeout(),
            tcp_keepalives_idle: Self::default_tcp_keepalives_idle(),
            tcp_keepalives_count: Self::default_tcp_keepalives_count(),
            tcp_keepalives_interval: Self::default_tcp_keepalives_interval(),
            tcp_no_delay: Self::default_tcp_no_delay(),
            backlog: Self::default_backlog(),
            shutdown_timeout: Self::default_shutdown_timeout(),
            worker_threads: Self::default_worker_threads(),
            tls_certificate: None,
            tls_private_key: None,
            tls_ca_cert: None,
            tls_mode: None,
            tls_rate_limit_per_second: Self::default_tls_rate_limit_per_second(),
        }
    }
}
