//! Streaming decoder for SLP responses.
//!
//! State machine: (1) read VarInt frame length, (2) read VarInt packet id,
//! (3) id=0x00 → VarInt-prefixed JSON body, (4) id=0x01 → 8-byte ping echo.
//! The buffer is persistent across calls; `poll` never discards bytes it
//! hasn't fully consumed, so a decoder fed one byte at a time behaves
//! identically to one fed the whole response at once.

use super::varint::{read_varint, VarIntReadError};
use crate::error::ScanError;

/// Reject any JSON body larger than this, before it is ever parsed.
pub const MAX_STATUS_JSON_BYTES: usize = 100 * 1024;

#[derive(Debug)]
pub enum DecodedPacket {
    /// Raw (not yet validated) status-response JSON bytes.
    StatusResponse(Vec<u8>),
    /// Echoed ping payload.
    Pong(i64),
}

pub enum DecodeOutcome {
    /// Not enough bytes buffered yet — call `push` and try again.
    Incomplete,
    Packet(DecodedPacket),
}

#[derive(Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempt to decode one complete packet from the buffered bytes.
    pub fn poll(&mut self) -> Result<DecodeOutcome, ScanError> {
        // Step 1: frame length.
        let (frame_len, frame_hdr_len) = match read_varint(&self.buf) {
            Ok(v) => v,
            Err(VarIntReadError::Incomplete) => return Ok(DecodeOutcome::Incomplete),
            Err(VarIntReadError::TooLarge) => {
                return Err(ScanError::Protocol("frame VarInt too large".into()))
            }
        };
        if frame_len < 0 {
            return Err(ScanError::Protocol("negative frame length".into()));
        }
        let frame_len = frame_len as usize;
        let frame_end = frame_hdr_len + frame_len;
        if self.buf.len() < frame_end {
            return Ok(DecodeOutcome::Incomplete);
        }

        let body = &self.buf[frame_hdr_len..frame_end];

        // Step 2: packet id.
        let (packet_id, id_len) = match read_varint(body) {
            Ok(v) => v,
            Err(VarIntReadError::Incomplete) => {
                return Err(ScanError::Protocol("truncated packet id".into()))
            }
            Err(VarIntReadError::TooLarge) => {
                return Err(ScanError::Protocol("packet id VarInt too large".into()))
            }
        };

        let rest = &body[id_len..];
        let outcome = match packet_id {
            0x00 => {
                let (json_len, json_hdr_len) = read_varint(rest)
                    .map_err(|_| ScanError::Protocol("truncated status JSON length".into()))?;
                if json_len < 0 {
                    return Err(ScanError::Protocol("negative JSON length".into()));
                }
                if json_len as usize > MAX_STATUS_JSON_BYTES {
                    return Err(ScanError::Protocol(format!(
                        "status JSON body too large: {json_len} bytes"
                    )));
                }
                let json_bytes = rest
                    .get(json_hdr_len..json_hdr_len + json_len as usize)
                    .ok_or_else(|| ScanError::Protocol("truncated status JSON body".into()))?
                    .to_vec();
                DecodedPacket::StatusResponse(json_bytes)
            }
            0x01 => {
                if rest.len() < 8 {
                    return Err(ScanError::Protocol("truncated ping payload".into()));
                }
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&rest[..8]);
                DecodedPacket::Pong(i64::from_be_bytes(arr))
            }
            other => return Err(ScanError::Protocol(format!("unexpected packet id {other}"))),
        };

        self.buf.drain(..frame_end);
        Ok(DecodeOutcome::Packet(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slp::packet::{encode_ping, encode_status_request};
    use crate::slp::varint::encode_varint;

    fn status_response_packet(json: &str) -> Vec<u8> {
        let mut body = Vec::new();
        encode_varint(0x00, &mut body);
        encode_varint(json.len() as i32, &mut body);
        body.extend_from_slice(json.as_bytes());
        let mut out = Vec::new();
        encode_varint(body.len() as i32, &mut out);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn decodes_status_response_fed_whole() {
        let pkt = status_response_packet(r#"{"version":{"protocol":765}}"#);
        let mut dec = Decoder::new();
        dec.push(&pkt);
        match dec.poll().unwrap() {
            DecodeOutcome::Packet(DecodedPacket::StatusResponse(bytes)) => {
                assert_eq!(bytes, br#"{"version":{"protocol":765}}"#);
            }
            _ => panic!("expected status response"),
        }
    }

    #[test]
    fn decodes_status_response_fed_byte_by_byte() {
        let pkt = status_response_packet(r#"{"players":{"online":1,"max":20}}"#);
        let mut dec = Decoder::new();
        for i in 0..pkt.len() - 1 {
            dec.push(&pkt[i..i + 1]);
            assert!(matches!(dec.poll().unwrap(), DecodeOutcome::Incomplete));
        }
        dec.push(&pkt[pkt.len() - 1..]);
        assert!(matches!(
            dec.poll().unwrap(),
            DecodeOutcome::Packet(DecodedPacket::StatusResponse(_))
        ));
    }

    #[test]
    fn decodes_pong_payload() {
        let pkt = encode_ping(42);
        // encode_ping produces a *client* ping frame; the server echoes the
        // same body back, so decoding it exercises the same code path.
        let mut dec = Decoder::new();
        dec.push(&pkt);
        match dec.poll().unwrap() {
            DecodeOutcome::Packet(DecodedPacket::Pong(v)) => assert_eq!(v, 42),
            _ => panic!("expected pong"),
        }
    }

    #[test]
    fn rejects_oversize_json_before_parsing() {
        let huge = "x".repeat(MAX_STATUS_JSON_BYTES + 1);
        let json = format!(r#"{{"description":"{huge}"}}"#);
        let pkt = status_response_packet(&json);
        let mut dec = Decoder::new();
        dec.push(&pkt);
        assert!(dec.poll().is_err());
    }

    #[test]
    fn status_request_packet_round_trips_through_decoder() {
        // status request has an empty body; verify frame math even though
        // the decoder only models server->client packet ids in practice.
        let pkt = encode_status_request();
        let (len, hdr) = read_varint(&pkt).unwrap();
        assert_eq!(len, 1);
        assert_eq!(pkt.len(), hdr + 1);
    }
}
