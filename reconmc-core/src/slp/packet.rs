//! Handshake / status-request / ping packet encoding.

use super::varint::{encode_string, encode_varint, varint_len};

const NEXT_STATE_STATUS: i32 = 1;

/// Wrap a packet body with its VarInt frame length.
fn frame(mut body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    encode_varint(body.len() as i32, &mut out);
    out.append(&mut body);
    out
}

/// `packetId=0x00, protocolVersion (VarInt), serverAddress (string), port (u16), nextState=1 (VarInt)`
pub fn encode_handshake(protocol_version: i32, server_address: &str, port: u16) -> Vec<u8> {
    let mut body = Vec::new();
    encode_varint(0x00, &mut body);
    encode_varint(protocol_version, &mut body);
    encode_string(server_address, &mut body);
    body.extend_from_slice(&port.to_be_bytes());
    encode_varint(NEXT_STATE_STATUS, &mut body);
    frame(body)
}

/// `packetId=0x00`, zero body.
pub fn encode_status_request() -> Vec<u8> {
    let mut body = Vec::new();
    encode_varint(0x00, &mut body);
    frame(body)
}

/// `packetId=0x01, payload=i64` — client stamp, latency = recv - send.
pub fn encode_ping(payload: i64) -> Vec<u8> {
    let mut body = Vec::new();
    encode_varint(0x01, &mut body);
    body.extend_from_slice(&payload.to_be_bytes());
    frame(body)
}

pub fn handshake_len(protocol_version: i32, server_address: &str, port: u16) -> usize {
    let _ = port;
    varint_len(0x00)
        + varint_len(protocol_version)
        + varint_len(server_address.len() as i32)
        + server_address.len()
        + 2
        + varint_len(NEXT_STATE_STATUS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slp::varint::read_varint;

    #[test]
    fn handshake_frame_length_matches_body() {
        let pkt = encode_handshake(765, "mc.example.com", 25565);
        let (frame_len, consumed) = read_varint(&pkt).unwrap();
        assert_eq!(frame_len as usize, pkt.len() - consumed);
    }

    #[test]
    fn status_request_is_single_byte_body() {
        let pkt = encode_status_request();
        let (frame_len, consumed) = read_varint(&pkt).unwrap();
        assert_eq!(frame_len, 1);
        assert_eq!(pkt.len() - consumed, 1);
    }

    #[test]
    fn ping_carries_i64_payload() {
        let pkt = encode_ping(123456789);
        let (frame_len, consumed) = read_varint(&pkt).unwrap();
        assert_eq!(frame_len as usize, 1 + 8);
        assert_eq!(pkt.len() - consumed, 9);
    }
}
