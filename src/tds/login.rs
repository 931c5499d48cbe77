//! `PRELOGIN` and `LOGIN7` parsing/building (MS-TDS §2.2.6.4-5), the
//! handshake that precedes every TDS session. Mirrors the teacher's
//! table-driven option parsing in `messages::protocol` (a list of typed
//! fields read in a fixed offset-table layout) adapted from Postgres's
//! startup-packet parameters to TDS's PRELOGIN option table.

use std::collections::HashMap;

use crate::errors::{Error, ErrorContext, Result};

/// `PRELOGIN` option token types (MS-TDS §2.2.6.4).
mod option {
    pub const VERSION: u8 = 0x00;
    pub const ENCRYPTION: u8 = 0x01;
    pub const INSTOPT: u8 = 0x02;
    pub const THREADID: u8 = 0x03;
    pub const MARS: u8 = 0x04;
    pub const TRACEID: u8 = 0x05;
    pub const TERMINATOR: u8 = 0xFF;
}

/// `ENCRYPTION` option byte values (MS-TDS §2.2.6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionOption {
    Off,
    On,
    NotSupported,
    Required,
}

impl EncryptionOption {
    fn from_byte(b: u8) -> Self {
        match b {
            0x00 => EncryptionOption::Off,
            0x01 => EncryptionOption::On,
            0x03 => EncryptionOption::Required,
            _ => EncryptionOption::NotSupported,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            EncryptionOption::Off => 0x00,
            EncryptionOption::On => 0x01,
            EncryptionOption::NotSupported => 0x02,
            EncryptionOption::Required => 0x03,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreLogin {
    pub version: [u8; 6],
    pub encryption: EncryptionOption,
    pub mars: bool,
}

/// Parse a `PRELOGIN` payload's option table: a sequence of
/// `{token:u8, offset:u16 BE, length:u16 BE}` entries terminated by
/// `0xFF`, followed by the option data each entry's offset points into.
fn parse_option_table(payload: &[u8]) -> Result<HashMap<u8, (usize, usize)>> {
    let mut offsets = HashMap::new();
    let mut pos = 0;
    loop {
        if pos >= payload.len() {
            return Err(Error::ProtocolError {
                reason: "PRELOGIN option table ran past end of payload without a terminator".into(),
                ctx: ErrorContext::new(),
            });
        }
        let token = payload[pos];
        if token == option::TERMINATOR {
            break;
        }
        if pos + 5 > payload.len() {
            return Err(Error::ProtocolError {
                reason: "truncated PRELOGIN option table entry".into(),
                ctx: ErrorContext::new(),
            });
        }
        let offset = u16::from_be_bytes([payload[pos + 1], payload[pos + 2]]) as usize;
        let length = u16::from_be_bytes([payload[pos + 3], payload[pos + 4]]) as usize;
        offsets.insert(token, (offset, length));
        pos += 5;
    }
    Ok(offsets)
}

pub fn parse_prelogin(payload: &[u8]) -> Result<PreLogin> {
    let offsets = parse_option_table(payload)?;

    let version = match offsets.get(&option::VERSION) {
        Some(&(off, len)) if len >= 6 && off + 6 <= payload.len() => {
            let mut v = [0u8; 6];
            v.copy_from_slice(&payload[off..off + 6]);
            v
        }
        _ => [0; 6],
    };

    let encryption = match offsets.get(&option::ENCRYPTION) {
        Some(&(off, len)) if len >= 1 && off < payload.len() => EncryptionOption::from_byte(payload[off]),
        _ => EncryptionOption::NotSupported,
    };

    let mars = match offsets.get(&option::MARS) {
        Some(&(off, len)) if len >= 1 && off < payload.len() => payload[off] != 0,
        _ => false,
    };

    Ok(PreLogin { version, encryption, mars })
}

/// Build the server's `PRELOGIN` response: a compact option table
/// echoing VERSION, the negotiated ENCRYPTION answer, and MARS support.
pub fn build_prelogin_response(server_version: [u8; 6], encryption: EncryptionOption, mars: bool) -> Vec<u8> {
    let entries: [(u8, Vec<u8>); 3] = [
        (option::VERSION, server_version.to_vec()),
        (option::ENCRYPTION, vec![encryption.to_byte()]),
        (option::MARS, vec![if mars { 1 } else { 0 }]),
    ];

    let table_len = entries.len() * 5 + 1;
    let mut table = Vec::with_capacity(table_len);
    let mut data = Vec::new();
    let mut offset = table_len;
    for (token, bytes) in &entries {
        table.push(*token);
        table.extend_from_slice(&(offset as u16).to_be_bytes());
        table.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        offset += bytes.len();
        data.extend_from_slice(bytes);
    }
    table.push(option::TERMINATOR);

    let mut out = table;
    out.extend_from_slice(&data);
    out
}

/// What spec §4.1's login flow actually needs out of `LOGIN7`: the
/// database the client wants, the login name, and the application name
/// (used only for diagnostics). Full `LOGIN7` carries many more fixed
/// fields (packet size, client PID, OS version...) that the connection
/// layer doesn't act on and this module doesn't retain.
#[derive(Debug, Clone, Default)]
pub struct Login7 {
    pub database: String,
    pub username: String,
    pub app_name: String,
    pub tds_version: u32,
}

/// `LOGIN7` fixed header field offsets (MS-TDS §2.2.6.5): each variable
/// field is an `{offset:u16, length_in_chars:u16}` pair at a known
/// position, pointing into the UTF-16LE variable-data section.
fn read_var_field(payload: &[u8], field_offset_pos: usize) -> Result<String> {
    if field_offset_pos + 4 > payload.len() {
        return Err(Error::ProtocolError {
            reason: "LOGIN7 payload too short for a fixed field offset/length pair".into(),
            ctx: ErrorContext::new(),
        });
    }
    let offset = u16::from_le_bytes([payload[field_offset_pos], payload[field_offset_pos + 1]]) as usize;
    let len_chars = u16::from_le_bytes([payload[field_offset_pos + 2], payload[field_offset_pos + 3]]) as usize;
    let byte_len = len_chars * 2;
    if offset + byte_len > payload.len() {
        return Ok(String::new());
    }
    let units: Vec<u16> = payload[offset..offset + byte_len]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// `LOGIN7` fixed-field offset table positions (bytes into the fixed
/// header, before the variable-length data section).
mod login7_offset {
    pub const TDS_VERSION: usize = 4;
    pub const HOSTNAME: usize = 36;
    pub const USERNAME: usize = 40;
    pub const PASSWORD: usize = 44;
    pub const APP_NAME: usize = 48;
    pub const SERVER_NAME: usize = 52;
    pub const CLT_INT_NAME: usize = 60;
    pub const LANGUAGE: usize = 64;
    pub const DATABASE: usize = 68;
}

pub fn parse_login7(payload: &[u8]) -> Result<Login7> {
    if payload.len() < login7_offset::DATABASE + 4 {
        return Err(Error::ProtocolError {
            reason: "LOGIN7 payload shorter than the fixed header".into(),
            ctx: ErrorContext::new(),
        });
    }
    let tds_version = u32::from_be_bytes(payload[login7_offset::TDS_VERSION..login7_offset::TDS_VERSION + 4].try_into().unwrap());
    let username = read_var_field(payload, login7_offset::USERNAME)?;
    let app_name = read_var_field(payload, login7_offset::APP_NAME)?;
    let database = read_var_field(payload, login7_offset::DATABASE)?;

    Ok(Login7 { database, username, app_name, tds_version })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_prelogin(enc: u8) -> Vec<u8> {
        let mut table = vec![
            option::VERSION, 0, 11, 0, 6,
            option::ENCRYPTION, 0, 17, 0, 1,
            option::TERMINATOR,
        ];
        table.extend_from_slice(&[9, 0, 0, 0, 0, 0]);
        table.push(enc);
        table
    }

    #[test]
    fn parses_encryption_option() {
        let payload = sample_prelogin(0x01);
        let pre = parse_prelogin(&payload).unwrap();
        assert_eq!(pre.encryption, EncryptionOption::On);
    }

    #[test]
    fn round_trips_prelogin_response() {
        let bytes = build_prelogin_response([9, 0, 0, 0, 0, 0], EncryptionOption::Required, false);
        let pre = parse_prelogin(&bytes).unwrap();
        assert_eq!(pre.encryption, EncryptionOption::Required);
        assert_eq!(pre.version, [9, 0, 0, 0, 0, 0]);
    }
}
