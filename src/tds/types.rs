//! Generic SQL type name to TDS fixed/variable type code mapping,
//! mirroring the teacher's table-driven `messages/protocol.rs` style
//! (a static table keyed by tag, consulted rather than branched on)
//! adapted from Postgres OIDs to TDS type codes.

/// Default collation (`0x09 0x04 0x0D 0x00 0x34`): a common SQL_Latin1
/// collation LCID with the binary/width flags most TDS clients expect.
pub const DEFAULT_COLLATION: [u8; 5] = [0x09, 0x04, 0x0D, 0x00, 0x34];

/// A column's on-the-wire TDS type description.
#[derive(Debug, Clone, PartialEq)]
pub struct TdsType {
    pub type_code: u8,
    /// Declared length in bytes; for fixed-length types this is the
    /// type's natural width, for variable-length types it's the maximum.
    pub length: usize,
    pub scale: Option<u8>,
    pub precision: Option<u8>,
    pub has_collation: bool,
}

impl TdsType {
    fn fixed(type_code: u8, length: usize) -> Self {
        TdsType { type_code, length, scale: None, precision: None, has_collation: false }
    }
}

// TDS fixed/variable type codes (MS-TDS §2.2.5.4).
const INT4TYPE: u8 = 0x38;
const INT8TYPE: u8 = 0x7F;
const INT2TYPE: u8 = 0x34;
const INT1TYPE: u8 = 0x30;
const BITTYPE: u8 = 0x32;
const FLT8TYPE: u8 = 0x3E;
const FLT4TYPE: u8 = 0x3B;
const DATETIMETYPE: u8 = 0x3D;
const MONEYTYPE: u8 = 0x3C;
const NVARCHARTYPE: u8 = 0xE7;
const BIGVARCHRTYPE: u8 = 0xA7;
const BIGVARBINTYPE: u8 = 0xA5;
const NUMERICNTYPE: u8 = 0x6C;
const GUIDTYPE: u8 = 0x24;

/// Map a generic SQL type name (case-insensitive, optional `(n)` or
/// `(p,s)` suffix ignored) to its wire representation. Unknown types
/// fall back to `NVARCHAR(8000)` per spec §4.1.
pub fn map_sql_type(name: &str) -> TdsType {
    let base = name.split('(').next().unwrap_or(name).trim().to_lowercase();
    match base.as_str() {
        "int" | "integer" => TdsType::fixed(INT4TYPE, 4),
        "bigint" => TdsType::fixed(INT8TYPE, 8),
        "smallint" => TdsType::fixed(INT2TYPE, 2),
        "tinyint" => TdsType::fixed(INT1TYPE, 1),
        "bit" | "boolean" => TdsType::fixed(BITTYPE, 1),
        "float" | "double" | "real8" => TdsType::fixed(FLT8TYPE, 8),
        "real" | "float4" => TdsType::fixed(FLT4TYPE, 4),
        "datetime" | "timestamp" => TdsType::fixed(DATETIMETYPE, 8),
        "money" => TdsType::fixed(MONEYTYPE, 8),
        "decimal" | "numeric" => TdsType {
            type_code: NUMERICNTYPE,
            length: 17,
            scale: Some(parse_scale(name).unwrap_or(0)),
            precision: Some(parse_precision(name).unwrap_or(38)),
            has_collation: false,
        },
        "uniqueidentifier" | "guid" => TdsType::fixed(GUIDTYPE, 16),
        "varchar" | "char" | "text" => TdsType {
            type_code: BIGVARCHRTYPE,
            length: parse_length(name).unwrap_or(8000),
            scale: None,
            precision: None,
            has_collation: true,
        },
        "varbinary" | "binary" | "blob" => TdsType {
            type_code: BIGVARBINTYPE,
            length: parse_length(name).unwrap_or(8000),
            scale: None,
            precision: None,
            has_collation: false,
        },
        _ => TdsType {
            type_code: NVARCHARTYPE,
            length: 8000,
            scale: None,
            precision: None,
            has_collation: true,
        },
    }
}

fn parse_length(name: &str) -> Option<usize> {
    let inner = name.split('(').nth(1)?.trim_end_matches(')');
    inner.split(',').next()?.trim().parse().ok()
}

fn parse_precision(name: &str) -> Option<u8> {
    let inner = name.split('(').nth(1)?.trim_end_matches(')');
    inner.split(',').next()?.trim().parse().ok()
}

fn parse_scale(name: &str) -> Option<u8> {
    let inner = name.split('(').nth(1)?.trim_end_matches(')');
    inner.split(',').nth(1)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_types() {
        assert_eq!(map_sql_type("INT").type_code, INT4TYPE);
        assert_eq!(map_sql_type("VARCHAR(50)").length, 50);
        assert_eq!(map_sql_type("bigint").type_code, INT8TYPE);
    }

    #[test]
    fn unknown_type_falls_back_to_nvarchar_8000() {
        let t = map_sql_type("geography");
        assert_eq!(t.type_code, NVARCHARTYPE);
        assert_eq!(t.length, 8000);
    }

    #[test]
    fn decimal_carries_precision_and_scale() {
        let t = map_sql_type("decimal(10,2)");
        assert_eq!(t.precision, Some(10));
        assert_eq!(t.scale, Some(2));
    }
}
