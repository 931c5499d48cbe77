//! TDS protocol engine (C1): the SQL Server-compatible wire protocol
//! this server speaks on its primary listener. Structured the way the
//! teacher splits its Postgres wire protocol across `messages::protocol`
//! (framing + token tables) and `server::protocol_io` (the read/write
//! loop), generalized from Postgres simple/extended query messages to
//! TDS packets/tokens.

pub mod framing;
pub mod login;
pub mod request;
pub mod tls;
pub mod types;

pub use framing::{read_message, read_packet, write_message, Packet, PacketType};
pub use login::{parse_login7, parse_prelogin, EncryptionOption, Login7, PreLogin};
pub use request::{classify, classify_rpc, Request, RpcCall};

pub mod token;
