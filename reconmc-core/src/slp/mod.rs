//! Server List Ping protocol codec.

pub mod decode;
pub mod packet;
pub mod validate;
pub mod varint;

pub use decode::{DecodeOutcome, DecodedPacket, Decoder};
pub use packet::{encode_handshake, encode_ping, encode_status_request};
pub use validate::{validate_status_json, PlayerSample, ValidatedStatus};

/// Protocol version placeholder used by agents that don't care about exact
/// version negotiation for the status ping (servers accept any value here).
pub const DEFAULT_PROTOCOL_VERSION: i32 = 765;
