//! TDS packet framing: `[type:u8 | status:u8 | length:u16 BE | spid:u16 | packetID:u8 | window:u8 | payload]`.
//!
//! Mirrors the teacher's `read_message_header`/`read_message_data` split
//! (one fixed-size header read followed by an exact-length payload read)
//! generalized from Postgres's 5-byte header to TDS's 8-byte one, and
//! kept generic over any `AsyncRead + AsyncWrite + Unpin` transport the
//! way the teacher parameterises its client/server stream types.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{Error, ErrorContext, Result};

pub const HEADER_LEN: usize = 8;

/// Upper bound on a logical message's total assembled size across all
/// packets. A client that never sets the EOM bit would otherwise grow
/// `read_message`'s buffer without limit; this is generous for any real
/// batch/RPC/login payload while still bounding per-connection memory.
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Packet type byte (first header field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    SqlBatch,
    Rpc,
    TabularResult,
    Attention,
    BulkLoad,
    TransactionManager,
    Login7,
    Sspi,
    PreLogin,
    Unknown(u8),
}

impl PacketType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => PacketType::SqlBatch,
            3 => PacketType::Rpc,
            4 => PacketType::TabularResult,
            6 => PacketType::Attention,
            7 => PacketType::BulkLoad,
            14 => PacketType::TransactionManager,
            16 => PacketType::Login7,
            17 => PacketType::Sspi,
            18 => PacketType::PreLogin,
            other => PacketType::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::SqlBatch => 1,
            PacketType::Rpc => 3,
            PacketType::TabularResult => 4,
            PacketType::Attention => 6,
            PacketType::BulkLoad => 7,
            PacketType::TransactionManager => 14,
            PacketType::Login7 => 16,
            PacketType::Sspi => 17,
            PacketType::PreLogin => 18,
            PacketType::Unknown(b) => b,
        }
    }
}

/// Status byte bits (second header field).
pub mod status {
    /// End of message: this is the final packet of the request.
    pub const EOM: u8 = 0x01;
    pub const IGNORE: u8 = 0x02;
    pub const RESET_CONNECTION: u8 = 0x08;
    pub const RESET_CONNECTION_SKIP_TRAN: u8 = 0x10;
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub packet_type: PacketType,
    pub status: u8,
    pub spid: u16,
    pub packet_id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn is_eom(&self) -> bool {
        self.status & status::EOM != 0
    }

    pub fn reset_connection(&self) -> bool {
        self.status & (status::RESET_CONNECTION | status::RESET_CONNECTION_SKIP_TRAN) != 0
    }

    pub fn reset_skip_tran(&self) -> bool {
        self.status & status::RESET_CONNECTION_SKIP_TRAN != 0
    }
}

/// Read exactly one packet (`ReadPacketWithStatus` from spec §4.1).
pub async fn read_packet<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Packet> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await.map_err(Error::Io)?;

    let packet_type = PacketType::from_byte(header[0]);
    let status_byte = header[1];
    let length = u16::from_be_bytes([header[2], header[3]]) as usize;
    let spid = u16::from_be_bytes([header[4], header[5]]);
    let packet_id = header[6];

    if length < HEADER_LEN {
        return Err(Error::ProtocolError {
            reason: format!("packet length {length} smaller than header size {HEADER_LEN}"),
            ctx: ErrorContext::new(),
        });
    }

    let mut payload = vec![0u8; length - HEADER_LEN];
    stream.read_exact(&mut payload).await.map_err(Error::Io)?;

    Ok(Packet {
        packet_type,
        status: status_byte,
        spid,
        packet_id,
        payload,
    })
}

/// Read packets until one carries the EOM bit, concatenating their
/// payloads into a single logical message.
pub async fn read_message<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(PacketType, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut first_type = None;
    loop {
        let packet = read_packet(stream).await?;
        if first_type.is_none() {
            first_type = Some(packet.packet_type);
        }
        if buf.len() + packet.payload.len() > MAX_MESSAGE_LEN {
            return Err(Error::ProtocolError {
                reason: format!("message exceeded {MAX_MESSAGE_LEN} bytes without an EOM packet"),
                ctx: ErrorContext::new(),
            });
        }
        buf.extend_from_slice(&packet.payload);
        if packet.is_eom() {
            break;
        }
    }
    Ok((first_type.unwrap(), buf))
}

/// Write `payload` as one or more packets of `packet_type`, splitting at
/// `negotiated_packet_size - HEADER_LEN` bytes and setting EOM on the
/// last one.
pub async fn write_message<S: AsyncWrite + Unpin>(
    stream: &mut S,
    packet_type: PacketType,
    spid: u16,
    payload: &[u8],
    negotiated_packet_size: usize,
) -> Result<()> {
    let chunk_size = negotiated_packet_size.saturating_sub(HEADER_LEN).max(1);
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&payload[..]]
    } else {
        payload.chunks(chunk_size).collect()
    };
    let last = chunks.len() - 1;

    for (id, chunk) in chunks.into_iter().enumerate() {
        let mut status_byte = 0u8;
        if id == last {
            status_byte |= status::EOM;
        }
        let length = (HEADER_LEN + chunk.len()) as u16;
        let mut out = Vec::with_capacity(HEADER_LEN + chunk.len());
        out.push(packet_type.to_byte());
        out.push(status_byte);
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&spid.to_be_bytes());
        out.push((id % 256) as u8);
        out.push(0); // window, unused
        out.extend_from_slice(chunk);
        stream.write_all(&out).await.map_err(Error::Io)?;
    }
    stream.flush().await.map_err(Error::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(packet_type: u8, status: u8, length: u16) -> Vec<u8> {
        let mut h = vec![packet_type, status];
        h.extend_from_slice(&length.to_be_bytes());
        h.extend_from_slice(&0u16.to_be_bytes());
        h.push(0);
        h.push(0);
        h
    }

    #[tokio::test]
    async fn reads_single_packet() {
        let mut bytes = header(1, status::EOM, 12);
        bytes.extend_from_slice(b"SELECT 1");
        let mut cursor = Cursor::new(bytes);
        let packet = read_packet(&mut cursor).await.unwrap();
        assert_eq!(packet.packet_type, PacketType::SqlBatch);
        assert!(packet.is_eom());
        assert_eq!(packet.payload, b"SELECT 1");
    }

    #[tokio::test]
    async fn concatenates_multi_packet_message() {
        let mut bytes = header(1, 0, 12);
        bytes.extend_from_slice(b"SELECT ");
        bytes.extend_from_slice(&header(1, status::EOM, 9));
        bytes.extend_from_slice(b"1");
        let mut cursor = Cursor::new(bytes);
        let (kind, payload) = read_message(&mut cursor).await.unwrap();
        assert_eq!(kind, PacketType::SqlBatch);
        assert_eq!(payload, b"SELECT 1");
    }

    #[tokio::test]
    async fn read_message_rejects_unbounded_non_eom_stream() {
        let payload_len: usize = 60_000;
        let packets_needed = MAX_MESSAGE_LEN / payload_len + 2;
        let mut bytes = Vec::new();
        for _ in 0..packets_needed {
            bytes.extend_from_slice(&header(1, 0, (payload_len + HEADER_LEN) as u16));
            bytes.extend(std::iter::repeat(0u8).take(payload_len));
        }
        let mut cursor = Cursor::new(bytes);
        let result = read_message(&mut cursor).await;
        assert!(matches!(result, Err(Error::ProtocolError { .. })));
    }

    #[tokio::test]
    async fn write_message_splits_to_negotiated_size() {
        let mut out = Vec::new();
        write_message(&mut out, PacketType::TabularResult, 1, &[0u8; 20], 16)
            .await
            .unwrap();
        // first packet: 16 bytes total (8 header + 8 payload), second: 8 + 12
        assert_eq!(out[2..4], 16u16.to_be_bytes());
        assert_eq!(out[1], 0);
        let second_header_at = 16;
        assert_eq!(out[second_header_at + 1], status::EOM);
    }
}
