//! Classifies an incoming TDS message into the operation the runtime
//! understands, mirroring the teacher's `messages::protocol` dispatch
//! (one match on a leading tag byte/field, producing an enum the
//! connection's main loop switches on) adapted from Postgres's simple
//! vs. extended query protocol split to TDS's `SQL_BATCH` vs.
//! `RPC_REQUEST` split.

use aul_jit_abi::Value;

use crate::errors::{Error, ErrorContext, Result};
use crate::tds::framing::PacketType;

/// One classified client request, ready to hand to the runtime.
#[derive(Debug, Clone)]
pub enum Request {
    /// Plain-text SQL batch (`SQL_BATCH`): the entire payload, after
    /// stripping `ALL_HEADERS`, is UTF-16LE SQL text.
    Query { sql: String },
    /// `sp_executesql`: first two RPC parameters are SQL text and
    /// parameter declarations, the rest are the bound values.
    QueryWithParams { sql: String, params: Vec<Value> },
    PrepareStatement { sql: String, params: Vec<Value> },
    ExecutePrepared { handle: i32, params: Vec<Value> },
    UnprepareStatement { handle: i32 },
    CursorOpen { sql: String, params: Vec<Value> },
    CursorFetch { cursor: i32, fetch_type: i32, row_count: i32 },
    CursorClose { cursor: i32 },
    CursorOption { cursor: i32, option: i32, value: i32 },
    /// Named or numeric-procID `RPC_REQUEST`: call a stored procedure.
    Exec { name: String, params: Vec<Value> },
    Cancel,
}

/// Well-known `RPC_REQUEST` procedure ids (MS-TDS §2.2.6.6), used when
/// the procedure name field carries a numeric id instead of a name.
mod proc_id {
    pub const SP_EXECUTESQL: u16 = 10;
    pub const SP_PREPARE: u16 = 11;
    pub const SP_EXECUTE: u16 = 12;
    pub const SP_PREPEXEC: u16 = 13;
    pub const SP_UNPREPARE: u16 = 15;
    pub const SP_CURSOROPEN: u16 = 1;
    pub const SP_CURSORFETCH: u16 = 7;
    pub const SP_CURSORCLOSE: u16 = 9;
    pub const SP_CURSOROPTION: u16 = 5;
}

/// Parse `ALL_HEADERS` (a length-prefixed list of `{total_length:u32,
/// header_length:u32, header_type:u16, data...}` entries) and return the
/// offset where the real payload begins. `SQL_BATCH` and `RPC_REQUEST`
/// both start with this structure when present.
fn skip_all_headers(payload: &[u8]) -> usize {
    if payload.len() < 4 {
        return 0;
    }
    let total_len = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    if total_len == 0 || total_len > payload.len() {
        0
    } else {
        total_len
    }
}

fn utf16le_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Classify a `SQL_BATCH` message: strip `ALL_HEADERS`, decode the rest
/// as UTF-16LE SQL text.
pub fn classify_sql_batch(payload: &[u8]) -> Request {
    let offset = skip_all_headers(payload);
    Request::Query { sql: utf16le_to_string(&payload[offset..]) }
}

/// Classify an `ATTENTION` message: always a cancellation, carries no
/// payload of its own.
pub fn classify_attention() -> Request {
    Request::Cancel
}

/// Minimal decoded shape of an `RPC_REQUEST`: the procedure identity
/// (name or well-known id) plus its positional parameter values. Full
/// `RPC_REQUEST` parsing (per-parameter type/collation/length headers)
/// lives in the connection layer; this module only needs the decoded
/// values to classify the call.
pub struct RpcCall {
    pub proc_id: Option<u16>,
    pub proc_name: Option<String>,
    pub params: Vec<Value>,
}

/// Classify a decoded `RPC_REQUEST` by procedure id/name per spec §4.1:
/// `sp_executesql` -> query with bound params, `sp_prepare`/`sp_execute`/
/// `sp_unprepare` -> prepared-statement ops, `sp_cursor*` -> cursor ops,
/// anything else -> a plain procedure exec.
pub fn classify_rpc(call: RpcCall) -> Result<Request> {
    if let Some(id) = call.proc_id {
        return classify_by_proc_id(id, call.params);
    }
    let name = call.proc_name.ok_or_else(|| Error::ProtocolError {
        reason: "RPC_REQUEST carries neither a procedure id nor a name".into(),
        ctx: ErrorContext::new(),
    })?;
    Ok(Request::Exec { name, params: call.params })
}

fn classify_by_proc_id(id: u16, mut params: Vec<Value>) -> Result<Request> {
    let take_text = |v: &Value| -> String {
        match v {
            Value::Text(s) => s.clone(),
            _ => String::new(),
        }
    };
    let take_int = |v: &Value| -> i32 {
        match v {
            Value::Int(i) => *i as i32,
            _ => 0,
        }
    };

    match id {
        proc_id::SP_EXECUTESQL => {
            if params.is_empty() {
                return Err(Error::ProtocolError {
                    reason: "sp_executesql called with no SQL text parameter".into(),
                    ctx: ErrorContext::new(),
                });
            }
            let sql = take_text(&params[0]);
            let bound = if params.len() > 2 { params.split_off(2) } else { Vec::new() };
            Ok(Request::QueryWithParams { sql, params: bound })
        }
        proc_id::SP_PREPARE | proc_id::SP_PREPEXEC => {
            let sql = params.get(1).map(&take_text).unwrap_or_default();
            let bound = if params.len() > 2 { params.split_off(2) } else { Vec::new() };
            Ok(Request::PrepareStatement { sql, params: bound })
        }
        proc_id::SP_EXECUTE => {
            let handle = params.first().map(&take_int).unwrap_or(0);
            let bound = if params.len() > 1 { params.split_off(1) } else { Vec::new() };
            Ok(Request::ExecutePrepared { handle, params: bound })
        }
        proc_id::SP_UNPREPARE => {
            let handle = params.first().map(&take_int).unwrap_or(0);
            Ok(Request::UnprepareStatement { handle })
        }
        proc_id::SP_CURSOROPEN => {
            let sql = params.get(1).map(&take_text).unwrap_or_default();
            let bound = if params.len() > 2 { params.split_off(2) } else { Vec::new() };
            Ok(Request::CursorOpen { sql, params: bound })
        }
        proc_id::SP_CURSORFETCH => Ok(Request::CursorFetch {
            cursor: params.first().map(&take_int).unwrap_or(0),
            fetch_type: params.get(1).map(&take_int).unwrap_or(0),
            row_count: params.get(2).map(&take_int).unwrap_or(0),
        }),
        proc_id::SP_CURSORCLOSE => Ok(Request::CursorClose {
            cursor: params.first().map(&take_int).unwrap_or(0),
        }),
        proc_id::SP_CURSOROPTION => Ok(Request::CursorOption {
            cursor: params.first().map(&take_int).unwrap_or(0),
            option: params.get(1).map(&take_int).unwrap_or(0),
            value: params.get(2).map(&take_int).unwrap_or(0),
        }),
        other => Err(Error::ProtocolError {
            reason: format!("unrecognized well-known RPC procedure id {other}"),
            ctx: ErrorContext::new(),
        }),
    }
}

/// Wire type codes for `RPC_REQUEST` parameter `TYPE_INFO` (MS-TDS
/// §2.2.5.4) that this decoder understands: the nullable fixed-length
/// ("N") types plus the "big" variable-length types. These cover every
/// parameter a practical TDS client (sqlcmd, ODBC, JDBC) sends for a
/// scalar value; anything else surfaces as a `ProtocolError` rather than
/// being silently misread.
mod param_type {
    pub const NULLTYPE: u8 = 0x1F;
    pub const GUIDTYPE: u8 = 0x24;
    pub const INTNTYPE: u8 = 0x26;
    pub const BITNTYPE: u8 = 0x68;
    pub const FLTNTYPE: u8 = 0x6D;
    pub const BIGVARBINTYPE: u8 = 0xA5;
    pub const BIGVARCHRTYPE: u8 = 0xA7;
    pub const BIGBINARYTYPE: u8 = 0xAD;
    pub const BIGCHARTYPE: u8 = 0xAF;
    pub const NVARCHARTYPE: u8 = 0xE7;
    pub const NCHARTYPE: u8 = 0xEF;
}

/// A forward-only byte cursor over an `RPC_REQUEST` payload, in the
/// style of the fixed-offset reads `login::parse_prelogin` does over
/// `PRELOGIN` — except this payload has no option table, just a
/// sequential run of variable-length fields.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::ProtocolError {
                reason: "RPC_REQUEST payload truncated".into(),
                ctx: ErrorContext::new(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.buf.len()
    }
}

/// `NameLenProcID` (MS-TDS §2.2.6.6): either a length-prefixed UTF-16LE
/// procedure name, or `0xFFFF` followed by a well-known numeric id.
fn parse_proc_identity(cur: &mut Cursor) -> Result<(Option<u16>, Option<String>)> {
    let name_len = cur.u16_le()?;
    if name_len == 0xFFFF {
        Ok((Some(cur.u16_le()?), None))
    } else {
        let bytes = cur.take(name_len as usize * 2)?;
        Ok((None, Some(utf16le_to_string(bytes))))
    }
}

/// One `RPC_REQUEST` parameter: `{NameLen:u8, Name, StatusFlags:u8,
/// TYPE_INFO, value}`. Parameter names are decoded but discarded — this
/// server binds RPC parameters positionally (spec §4.3).
fn parse_param(cur: &mut Cursor) -> Result<Value> {
    let name_len = cur.u8()? as usize;
    cur.take(name_len * 2)?;
    let _status_flags = cur.u8()?;
    let type_code = cur.u8()?;

    match type_code {
        param_type::NULLTYPE => Ok(Value::Null),
        param_type::INTNTYPE => {
            let len = cur.u8()? as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            let data = cur.take(len)?;
            let v = match len {
                1 => data[0] as i64,
                2 => i16::from_le_bytes(data.try_into().unwrap()) as i64,
                4 => i32::from_le_bytes(data.try_into().unwrap()) as i64,
                8 => i64::from_le_bytes(data.try_into().unwrap()),
                other => {
                    return Err(Error::ProtocolError {
                        reason: format!("unsupported INTN width {other}"),
                        ctx: ErrorContext::new(),
                    })
                }
            };
            Ok(Value::Int(v))
        }
        param_type::BITNTYPE => {
            let len = cur.u8()? as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            Ok(Value::Bool(cur.take(len)?[0] != 0))
        }
        param_type::FLTNTYPE => {
            let len = cur.u8()? as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            let data = cur.take(len)?;
            let v = match len {
                4 => f32::from_le_bytes(data.try_into().unwrap()) as f64,
                8 => f64::from_le_bytes(data.try_into().unwrap()),
                other => {
                    return Err(Error::ProtocolError {
                        reason: format!("unsupported FLTN width {other}"),
                        ctx: ErrorContext::new(),
                    })
                }
            };
            Ok(Value::Float(v))
        }
        param_type::GUIDTYPE => {
            let len = cur.u8()? as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            Ok(Value::Blob(cur.take(len)?.to_vec()))
        }
        param_type::BIGVARCHRTYPE | param_type::BIGCHARTYPE => {
            cur.u16_le()?; // max length
            cur.take(5)?; // collation
            let actual_len = cur.u16_le()?;
            if actual_len == 0xFFFF {
                return Ok(Value::Null);
            }
            let data = cur.take(actual_len as usize)?;
            Ok(Value::Text(String::from_utf8_lossy(data).into_owned()))
        }
        param_type::NVARCHARTYPE | param_type::NCHARTYPE => {
            cur.u16_le()?; // max length
            cur.take(5)?; // collation
            let actual_len = cur.u16_le()?;
            if actual_len == 0xFFFF {
                return Ok(Value::Null);
            }
            Ok(Value::Text(utf16le_to_string(cur.take(actual_len as usize)?)))
        }
        param_type::BIGVARBINTYPE | param_type::BIGBINARYTYPE => {
            cur.u16_le()?; // max length
            let actual_len = cur.u16_le()?;
            if actual_len == 0xFFFF {
                return Ok(Value::Null);
            }
            Ok(Value::Blob(cur.take(actual_len as usize)?.to_vec()))
        }
        other => Err(Error::ProtocolError {
            reason: format!("unsupported RPC parameter type code 0x{other:02X}"),
            ctx: ErrorContext::new(),
        }),
    }
}

/// Decode a raw `RPC_REQUEST` payload into an [`RpcCall`]: strip
/// `ALL_HEADERS`, read the procedure identity and option flags, then
/// every parameter up to the end of the payload.
pub fn parse_rpc_request(payload: &[u8]) -> Result<RpcCall> {
    let offset = skip_all_headers(payload);
    let mut cur = Cursor::new(&payload[offset..]);
    let (proc_id, proc_name) = parse_proc_identity(&mut cur)?;
    cur.u16_le()?; // OptionFlags: fWithRecompile / fNoMetadata, unused here

    let mut params = Vec::new();
    while cur.has_remaining() {
        params.push(parse_param(&mut cur)?);
    }
    Ok(RpcCall { proc_id, proc_name, params })
}

/// Classify a full message by its leading `PacketType`, dispatching to
/// the per-type classifiers above.
pub fn classify(packet_type: PacketType, payload: &[u8]) -> Result<Request> {
    match packet_type {
        PacketType::SqlBatch => Ok(classify_sql_batch(payload)),
        PacketType::Attention => Ok(classify_attention()),
        PacketType::Rpc => classify_rpc(parse_rpc_request(payload)?),
        other => Err(Error::ProtocolError {
            reason: format!("unexpected packet type for a request: {other:?}"),
            ctx: ErrorContext::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn classifies_sql_batch_without_headers() {
        let payload = utf16le("SELECT 1");
        match classify_sql_batch(&payload) {
            Request::Query { sql } => assert_eq!(sql, "SELECT 1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn sp_executesql_splits_sql_and_bound_params() {
        let call = RpcCall {
            proc_id: Some(proc_id::SP_EXECUTESQL),
            proc_name: None,
            params: vec![
                Value::Text("SELECT @p1".into()),
                Value::Text("@p1 int".into()),
                Value::Int(42),
            ],
        };
        match classify_rpc(call).unwrap() {
            Request::QueryWithParams { sql, params } => {
                assert_eq!(sql, "SELECT @p1");
                assert_eq!(params, vec![Value::Int(42)]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn named_procedure_becomes_exec() {
        let call = RpcCall {
            proc_id: None,
            proc_name: Some("dbo.GetUser".into()),
            params: vec![Value::Int(1)],
        };
        match classify_rpc(call).unwrap() {
            Request::Exec { name, params } => {
                assert_eq!(name, "dbo.GetUser");
                assert_eq!(params.len(), 1);
            }
            _ => panic!("wrong variant"),
        }
    }

    /// Builds a raw `RPC_REQUEST` payload for a named procedure call
    /// with a single `INTNTYPE` parameter, with no `ALL_HEADERS` prefix.
    fn build_rpc_payload(proc_name: &str, int_param: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        let name = utf16le(proc_name);
        buf.extend_from_slice(&((name.len() / 2) as u16).to_le_bytes());
        buf.extend_from_slice(&name);
        buf.extend_from_slice(&0u16.to_le_bytes()); // OptionFlags
        buf.push(0); // param name length
        buf.push(0); // status flags
        buf.push(param_type::INTNTYPE);
        buf.push(4); // INTN length
        buf.extend_from_slice(&int_param.to_le_bytes());
        buf
    }

    #[test]
    fn parse_rpc_request_decodes_named_call_with_int_param() {
        let payload = build_rpc_payload("dbo.GetUser", 7);
        let call = parse_rpc_request(&payload).unwrap();
        assert_eq!(call.proc_name, Some("dbo.GetUser".to_string()));
        assert_eq!(call.params, vec![Value::Int(7)]);
    }

    #[test]
    fn classify_routes_rpc_packet_through_the_raw_parser() {
        let payload = build_rpc_payload("dbo.GetUser", 7);
        match classify(PacketType::Rpc, &payload).unwrap() {
            Request::Exec { name, params } => {
                assert_eq!(name, "dbo.GetUser");
                assert_eq!(params, vec![Value::Int(7)]);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parse_rpc_request_decodes_numeric_proc_id() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0xFFFFu16.to_le_bytes());
        buf.extend_from_slice(&proc_id::SP_EXECUTESQL.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        let call = parse_rpc_request(&buf).unwrap();
        assert_eq!(call.proc_id, Some(proc_id::SP_EXECUTESQL));
        assert!(call.params.is_empty());
    }
}
