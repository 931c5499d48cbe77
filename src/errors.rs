//! Errors.
//!
//! Every error that crosses a component boundary is wrapped exactly once,
//! here, and carries the structured fields callers need to render a
//! SQL Server-compatible `ERROR` token or an HTTP error body: the affected
//! procedure, database, tenant, transaction id, and session SPID.

use std::fmt;

/// Fields attached to an [`Error`] at the point it crosses a component
/// boundary. Not every field applies to every error; unset fields are
/// simply omitted from the rendered message and from the wire encoding.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub procedure: Option<String>,
    pub database: Option<String>,
    pub tenant: Option<String>,
    pub txn_id: Option<u64>,
    pub spid: Option<u16>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_procedure(mut self, name: impl Into<String>) -> Self {
        self.procedure = Some(name.into());
        self
    }

    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    pub fn with_tenant(mut self, name: impl Into<String>) -> Self {
        self.tenant = Some(name.into());
        self
    }

    pub fn with_txn(mut self, id: u64) -> Self {
        self.txn_id = Some(id);
        self
    }

    pub fn with_spid(mut self, spid: u16) -> Self {
        self.spid = Some(spid);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut wrote = false;
        if let Some(ref p) = self.procedure {
            write!(f, "proc={p}")?;
            wrote = true;
        }
        if let Some(ref d) = self.database {
            if wrote {
                write!(f, ", ")?;
            }
            write!(f, "db={d}")?;
            wrote = true;
        }
        if let Some(ref t) = self.tenant {
            if wrote {
                write!(f, ", ")?;
            }
            write!(f, "tenant={t}")?;
            wrote = true;
        }
        if let Some(t) = self.txn_id {
            if wrote {
                write!(f, ", ")?;
            }
            write!(f, "txn={t}")?;
            wrote = true;
        }
        if let Some(s) = self.spid {
            if wrote {
                write!(f, ", ")?;
            }
            write!(f, "spid={s}")?;
        }
        write!(f, "]")
    }
}

/// Stable classification of an [`Error`], independent of its `Display`
/// text. The TDS encoder and the HTTP collaborator both key off this to
/// choose a severity / HTTP status, so it must not change shape across
/// releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProcNotFound,
    SchemaMismatch,
    NestingLimitExceeded,
    ExecFailed,
    NoTransaction,
    TxnFailed,
    CrossDatabaseQuery,
    IsolatedTableReadOnly,
    ProtocolError,
    AuthFailed,
    TlsFailed,
    JitCompileFailed,
    NotImplemented,
    Timeout,
    Cancelled,
}

/// The crate-wide error type. One variant family per taxonomy kind from
/// the design's error taxonomy; leaf errors are produced deep in a
/// component and wrapped here once, at the boundary. `ExecFailed` from a
/// nested call is propagated unchanged rather than re-wrapped — see
/// callers in `runtime`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{ctx}: procedure not found: {name}")]
    ProcNotFound { name: String, ctx: ErrorContext },

    #[error("{ctx}: schema mismatch: declared {declared:?}, directory says {from_path:?}")]
    SchemaMismatch {
        declared: String,
        from_path: String,
        ctx: ErrorContext,
    },

    #[error("{ctx}: nesting limit exceeded: depth {depth} > {limit}")]
    NestingLimitExceeded {
        depth: u32,
        limit: u32,
        ctx: ErrorContext,
    },

    #[error("{ctx}: execution failed: {source}")]
    ExecFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        ctx: ErrorContext,
    },

    #[error("{ctx}: no active transaction")]
    NoTransaction { ctx: ErrorContext },

    #[error("{ctx}: transaction failed: {reason}")]
    TxnFailed { reason: String, ctx: ErrorContext },

    #[error("{ctx}: cross-database query across tables {tables:?}")]
    CrossDatabaseQuery {
        tables: Vec<String>,
        ctx: ErrorContext,
    },

    #[error("{ctx}: table {table} is read-only")]
    IsolatedTableReadOnly { table: String, ctx: ErrorContext },

    #[error("{ctx}: protocol error: {reason}")]
    ProtocolError { reason: String, ctx: ErrorContext },

    #[error("{ctx}: authentication failed: {reason}")]
    AuthFailed { reason: String, ctx: ErrorContext },

    #[error("{ctx}: TLS failed: {reason}")]
    TlsFailed { reason: String, ctx: ErrorContext },

    #[error("{ctx}: JIT compile failed: {reason}")]
    JitCompileFailed { reason: String, ctx: ErrorContext },

    #[error("{ctx}: not implemented: {what}")]
    NotImplemented { what: String, ctx: ErrorContext },

    #[error("{ctx}: timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64, ctx: ErrorContext },

    #[error("{ctx}: cancelled")]
    Cancelled { ctx: ErrorContext },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bad configuration: {0}")]
    BadConfig(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ProcNotFound { .. } => ErrorKind::ProcNotFound,
            Error::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Error::NestingLimitExceeded { .. } => ErrorKind::NestingLimitExceeded,
            Error::ExecFailed { .. } => ErrorKind::ExecFailed,
            Error::NoTransaction { .. } => ErrorKind::NoTransaction,
            Error::TxnFailed { .. } => ErrorKind::TxnFailed,
            Error::CrossDatabaseQuery { .. } => ErrorKind::CrossDatabaseQuery,
            Error::IsolatedTableReadOnly { .. } => ErrorKind::IsolatedTableReadOnly,
            Error::ProtocolError { .. } => ErrorKind::ProtocolError,
            Error::AuthFailed { .. } => ErrorKind::AuthFailed,
            Error::TlsFailed { .. } => ErrorKind::TlsFailed,
            Error::JitCompileFailed { .. } => ErrorKind::JitCompileFailed,
            Error::NotImplemented { .. } => ErrorKind::NotImplemented,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Io(_) | Error::BadConfig(_) => ErrorKind::ProtocolError,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::ProcNotFound { ctx, .. }
            | Error::SchemaMismatch { ctx, .. }
            | Error::NestingLimitExceeded { ctx, .. }
            | Error::ExecFailed { ctx, .. }
            | Error::NoTransaction { ctx }
            | Error::TxnFailed { ctx, .. }
            | Error::CrossDatabaseQuery { ctx, .. }
            | Error::IsolatedTableReadOnly { ctx, .. }
            | Error::ProtocolError { ctx, .. }
            | Error::AuthFailed { ctx, .. }
            | Error::TlsFailed { ctx, .. }
            | Error::JitCompileFailed { ctx, .. }
            | Error::NotImplemented { ctx, .. }
            | Error::Timeout { ctx, .. }
            | Error::Cancelled { ctx } => Some(ctx),
            Error::Io(_) | Error::BadConfig(_) => None,
        }
    }

    /// SQL Server-compatible severity for the `ERROR` token. 16 is the
    /// generic "user correctable" severity used for most application
    /// errors; 20 is used for errors that terminate the connection.
    pub fn severity(&self) -> u8 {
        match self.kind() {
            ErrorKind::AuthFailed | ErrorKind::TlsFailed | ErrorKind::ProtocolError => 20,
            _ => 16,
        }
    }

    pub fn exec_failed(
        source: impl std::error::Error + Send + Sync + 'static,
        ctx: ErrorContext,
    ) -> Self {
        Error::ExecFailed {
            source: Box::new(source),
            ctx,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
