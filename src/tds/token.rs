//! Response token stream encoding: turns a `runtime::ExecOutcome` (or an
//! `Error`) into the MS-TDS token sequence a client expects inside a
//! `TabularResult` message, mirroring the teacher's table-driven message
//! builders in `messages/protocol.rs` (one encode function per token,
//! assembled in response-shape order by the caller) adapted from
//! Postgres's simple-query response messages to TDS tokens.

use aul_jit_abi::{ColumnInfo, ResultSet, Value};

use crate::errors::Error;
use crate::tds::types::{self, DEFAULT_COLLATION};

const TOKEN_ERROR: u8 = 0xAA;
const TOKEN_INFO: u8 = 0xAB;
const TOKEN_LOGINACK: u8 = 0xAD;
const TOKEN_ENVCHANGE: u8 = 0xE3;
const TOKEN_DONE: u8 = 0xFD;
const TOKEN_DONEPROC: u8 = 0xFE;
const TOKEN_DONEINPROC: u8 = 0xFF;
const TOKEN_COLMETADATA: u8 = 0x81;
const TOKEN_ROW: u8 = 0xD1;
const TOKEN_RETURNVALUE: u8 = 0xAC;

/// `DONE`/`DONEPROC`/`DONEINPROC` status bits (MS-TDS §2.2.7.5).
pub mod done_status {
    pub const FINAL: u16 = 0x00;
    pub const MORE: u16 = 0x01;
    pub const ERROR: u16 = 0x02;
    pub const INXACT: u16 = 0x04;
    pub const COUNT: u16 = 0x10;
    pub const ATTN: u16 = 0x20;
}

/// Interface the server negotiated in `LOGINACK`. `Sql2012` is the
/// highest the teacher's annotated generations target; capped at TDS 7.4
/// regardless of what the client requests, per spec §4.1.
pub const TDS_VERSION_7_4: u32 = 0x74000004;

fn put_us_varchar(buf: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    buf.extend_from_slice(&(units.len() as u16).to_le_bytes());
    for u in units {
        buf.extend_from_slice(&u.to_le_bytes());
    }
}

fn put_b_varchar(buf: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    buf.push(units.len() as u8);
    for u in units {
        buf.extend_from_slice(&u.to_le_bytes());
    }
}

/// Build an `ERROR` token followed by a final `DONE` carrying the
/// `ERROR` status bit, the shape every failed request collapses to
/// (spec §4.1 Response encoding: `ResultError` -> `ERROR` + `DONE`).
pub fn encode_error(err: &Error, spid: u16) -> Vec<u8> {
    let mut buf = Vec::new();
    let number: i32 = match err.kind() {
        crate::errors::ErrorKind::ProcNotFound => 2812,
        crate::errors::ErrorKind::AuthFailed => 18456,
        crate::errors::ErrorKind::TxnFailed => 3902,
        crate::errors::ErrorKind::NoTransaction => 3903,
        _ => 50000,
    };
    let message = err.to_string();

    buf.push(TOKEN_ERROR);
    let mut body = Vec::new();
    body.extend_from_slice(&number.to_le_bytes());
    body.push(err.severity());
    body.push(1); // state
    put_us_varchar(&mut body, &message);
    put_b_varchar(&mut body, "aul");
    put_b_varchar(&mut body, "");
    body.extend_from_slice(&0u32.to_le_bytes()); // line number
    buf.extend_from_slice(&(body.len() as u16).to_le_bytes());
    buf.extend_from_slice(&body);

    buf.extend_from_slice(&encode_done(done_status::FINAL | done_status::ERROR, 0, spid));
    buf
}

/// `DONE` token: final status, affected-row count, current process id.
pub fn encode_done(status: u16, row_count: u64, curcmd: u16) -> Vec<u8> {
    let mut buf = vec![TOKEN_DONE];
    buf.extend_from_slice(&status.to_le_bytes());
    buf.extend_from_slice(&curcmd.to_le_bytes());
    buf.extend_from_slice(&row_count.to_le_bytes());
    buf
}

pub fn encode_doneinproc(status: u16, row_count: u64, curcmd: u16) -> Vec<u8> {
    let mut buf = vec![TOKEN_DONEINPROC];
    buf.extend_from_slice(&status.to_le_bytes());
    buf.extend_from_slice(&curcmd.to_le_bytes());
    buf.extend_from_slice(&row_count.to_le_bytes());
    buf
}

pub fn encode_doneproc(status: u16, row_count: u64, curcmd: u16) -> Vec<u8> {
    let mut buf = vec![TOKEN_DONEPROC];
    buf.extend_from_slice(&status.to_le_bytes());
    buf.extend_from_slice(&curcmd.to_le_bytes());
    buf.extend_from_slice(&row_count.to_le_bytes());
    buf
}

/// `INFO`/`ERROR`-shaped token for informational messages (PRINT, etc).
pub fn encode_info(number: i32, message: &str) -> Vec<u8> {
    let mut buf = vec![TOKEN_INFO];
    let mut body = Vec::new();
    body.extend_from_slice(&number.to_le_bytes());
    body.push(1); // state
    body.push(0); // class: 0 means informational
    put_us_varchar(&mut body, message);
    put_b_varchar(&mut body, "aul");
    put_b_varchar(&mut body, "");
    body.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&(body.len() as u16).to_le_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// `ENVCHANGE` token for one of the three values negotiated at login
/// time: database, packet size, collation (spec §4.1 Login flow).
pub fn encode_envchange_string(change_type: u8, old: &str, new: &str) -> Vec<u8> {
    let mut buf = vec![TOKEN_ENVCHANGE];
    let mut body = vec![change_type];
    put_b_varchar(&mut body, new);
    put_b_varchar(&mut body, old);
    buf.extend_from_slice(&(body.len() as u16).to_le_bytes());
    buf.extend_from_slice(&body);
    buf
}

pub fn encode_envchange_packet_size(old: u32, new: u32) -> Vec<u8> {
    encode_envchange_string(4, &old.to_string(), &new.to_string())
}

/// `LOGINACK`: confirms the negotiated TDS version and server program
/// name/version, capped at TDS 7.4 regardless of the client's ask.
pub fn encode_loginack(server_name: &str, server_version: [u8; 4]) -> Vec<u8> {
    let mut buf = vec![TOKEN_LOGINACK];
    let mut body = Vec::new();
    body.push(1); // interface: SQL
    body.extend_from_slice(&TDS_VERSION_7_4.to_be_bytes());
    put_b_varchar(&mut body, server_name);
    body.extend_from_slice(&server_version);
    buf.extend_from_slice(&(body.len() as u16).to_le_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// `COLMETADATA` for one result set, mapping each column's generic SQL
/// type name through [`types::map_sql_type`].
pub fn encode_colmetadata(columns: &[ColumnInfo]) -> Vec<u8> {
    let mut buf = vec![TOKEN_COLMETADATA];
    buf.extend_from_slice(&(columns.len() as u16).to_le_bytes());
    for col in columns {
        let ty = types::map_sql_type(&col.sql_type);
        buf.extend_from_slice(&0u32.to_le_bytes()); // user type
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.push(ty.type_code);
        if ty.length > 0xFF || ty.has_collation {
            buf.extend_from_slice(&(ty.length as u16).to_le_bytes());
        } else {
            buf.push(ty.length as u8);
        }
        if let (Some(p), Some(s)) = (ty.precision, ty.scale) {
            buf.push(p);
            buf.push(s);
        }
        if ty.has_collation {
            buf.extend_from_slice(&DEFAULT_COLLATION);
        }
        put_b_varchar(&mut buf, &col.name);
    }
    buf
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(0xFF),
        Value::Int(i) => {
            let bytes = i.to_le_bytes();
            buf.push(8);
            buf.extend_from_slice(&bytes);
        }
        Value::Float(f) => {
            buf.push(8);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Value::Bool(b) => {
            buf.push(1);
            buf.push(if *b { 1 } else { 0 });
        }
        Value::Text(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            let len = (units.len() * 2) as u16;
            buf.extend_from_slice(&len.to_le_bytes());
            for u in units {
                buf.extend_from_slice(&u.to_le_bytes());
            }
        }
        Value::Blob(b) => {
            buf.extend_from_slice(&(b.len() as u16).to_le_bytes());
            buf.extend_from_slice(b);
        }
    }
}

/// `ROW` token: one row of values, encoded positionally against the
/// preceding `COLMETADATA`.
pub fn encode_row(values: &[Value]) -> Vec<u8> {
    let mut buf = vec![TOKEN_ROW];
    for v in values {
        encode_value(&mut buf, v);
    }
    buf
}

/// `RETURNVALUE` token for one output parameter.
pub fn encode_returnvalue(ordinal: u16, name: &str, value: &Value) -> Vec<u8> {
    let mut buf = vec![TOKEN_RETURNVALUE];
    buf.extend_from_slice(&ordinal.to_le_bytes());
    put_b_varchar(&mut buf, name);
    buf.push(1); // status: output param
    buf.extend_from_slice(&0u32.to_le_bytes()); // user type
    buf.extend_from_slice(&0u16.to_le_bytes()); // flags

    let sql_type = match value {
        Value::Int(_) => "bigint",
        Value::Float(_) => "float",
        Value::Bool(_) => "bit",
        Value::Blob(_) => "varbinary(8000)",
        Value::Null | Value::Text(_) => "nvarchar(4000)",
    };
    let ty = types::map_sql_type(sql_type);
    buf.push(ty.type_code);
    if ty.length > 0xFF || ty.has_collation {
        buf.extend_from_slice(&(ty.length as u16).to_le_bytes());
    } else {
        buf.push(ty.length as u8);
    }
    if ty.has_collation {
        buf.extend_from_slice(&DEFAULT_COLLATION);
    }
    encode_value(&mut buf, value);
    buf
}

/// Encode one full result set: `COLMETADATA` followed by every `ROW`.
pub fn encode_result_set(rs: &ResultSet) -> Vec<u8> {
    let mut buf = encode_colmetadata(&rs.columns);
    for row in &rs.rows {
        buf.extend_from_slice(&encode_row(row));
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_done_token_with_row_count() {
        let buf = encode_done(done_status::FINAL | done_status::COUNT, 3, 0);
        assert_eq!(buf[0], TOKEN_DONE);
        let row_count = u64::from_le_bytes(buf[5..13].try_into().unwrap());
        assert_eq!(row_count, 3);
    }

    #[test]
    fn encodes_result_set_with_columns_and_rows() {
        let rs = ResultSet {
            columns: vec![ColumnInfo { name: "id".into(), sql_type: "int".into() }],
            rows: vec![vec![Value::Int(7)]],
        };
        let buf = encode_result_set(&rs);
        assert_eq!(buf[0], TOKEN_COLMETADATA);
        assert!(buf.contains(&TOKEN_ROW));
    }

    #[test]
    fn error_token_carries_severity_and_ends_in_done_error() {
        let err = Error::ProcNotFound {
            name: "Missing".into(),
            ctx: crate::errors::ErrorContext::new(),
        };
        let buf = encode_error(&err, 1);
        assert_eq!(buf[0], TOKEN_ERROR);
        let done_at = buf.len() - 13;
        assert_eq!(buf[done_at], TOKEN_DONE);
        let status = u16::from_le_bytes([buf[done_at + 1], buf[done_at + 2]]);
        assert_eq!(status & done_status::ERROR, done_status::ERROR);
    }
}
