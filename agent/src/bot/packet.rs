//! Pure encode/decode for the slice of the login and play protocol states a
//! bot actually needs: login start/encryption/success, join game, movement,
//! disconnect, chat, tab-completion, and the `declare_commands` tree.
//!
//! Every packet here arrives already length-delimited by
//! [`super::BotConnection`]'s frame reader, so decoders only need to walk a
//! borrowed `&[u8]` body and never have to worry about partial reads —
//! the same split `reconmc_core::slp` uses between framing and payload
//! parsing.
//!
//! Packet ids are pinned to protocol version 765
//! (`reconmc_core::slp::DEFAULT_PROTOCOL_VERSION`), matching the vanilla
//! 1.20.4 numbering.

use reconmc_core::error::ScanError;
use reconmc_core::slp::varint::{encode_string, encode_varint, read_varint, VarIntReadError};
use uuid::Uuid;

// ── Login state ──────────────────────────────────────────────────────────

pub mod login {
    pub const HELLO_C2S: i32 = 0x00;
    pub const KEY_C2S: i32 = 0x01;
    pub const DISCONNECT_S2C: i32 = 0x00;
    pub const ENCRYPTION_REQUEST_S2C: i32 = 0x01;
    pub const SUCCESS_S2C: i32 = 0x02;
    pub const SET_COMPRESSION_S2C: i32 = 0x03;
}

pub mod play {
    pub const DECLARE_COMMANDS_S2C: i32 = 0x11;
    pub const TAB_COMPLETE_S2C: i32 = 0x0f;
    pub const CHAT_S2C: i32 = 0x64;
    pub const JOIN_GAME_S2C: i32 = 0x28;
    pub const PLAYER_POSITION_S2C: i32 = 0x3e;
    pub const DISCONNECT_S2C: i32 = 0x1a;

    pub const TAB_COMPLETE_C2S: i32 = 0x0a;
    pub const CHAT_COMMAND_C2S: i32 = 0x05;
    pub const CHAT_MESSAGE_C2S: i32 = 0x06;
    pub const TELEPORT_CONFIRM_C2S: i32 = 0x00;
}

/// `LoginHelloC2s { username: Bounded<&str, 16>, profile_id: Option<Uuid> }`
pub fn encode_login_hello(username: &str, profile_id: Option<Uuid>) -> Vec<u8> {
    let mut body = Vec::new();
    encode_string(username, &mut body);
    body.push(profile_id.is_some() as u8);
    if let Some(id) = profile_id {
        body.extend_from_slice(id.as_bytes());
    }
    body
}

pub struct EncryptionRequest {
    pub public_key: Vec<u8>,
    pub verify_token: Vec<u8>,
}

/// `LoginHelloS2c { server_id: &str, public_key: &[u8], verify_token: &[u8] }`
/// — `server_id` is always the empty string on real servers and is not
/// needed downstream, so it is parsed and discarded.
pub fn decode_encryption_request(body: &[u8]) -> Result<EncryptionRequest, ScanError> {
    let mut c = Cursor::new(body);
    let _server_id = c.read_string()?;
    let public_key = c.read_byte_array()?;
    let verify_token = c.read_byte_array()?;
    Ok(EncryptionRequest {
        public_key,
        verify_token,
    })
}

/// `LoginKeyC2s { shared_secret: &[u8], verify_token: &[u8] }`
pub fn encode_login_key(shared_secret: &[u8], verify_token: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    encode_byte_array(shared_secret, &mut body);
    encode_byte_array(verify_token, &mut body);
    body
}

pub struct LoginSuccess {
    pub uuid: Uuid,
    pub username: String,
}

/// `LoginSuccessS2c { uuid, username, properties }` — the property array
/// (skin/cape textures) is not consumed by anything downstream here.
pub fn decode_login_success(body: &[u8]) -> Result<LoginSuccess, ScanError> {
    let mut c = Cursor::new(body);
    let mut uuid_bytes = [0u8; 16];
    uuid_bytes.copy_from_slice(c.read_bytes(16)?);
    let username = c.read_string()?;
    Ok(LoginSuccess {
        uuid: Uuid::from_bytes(uuid_bytes),
        username,
    })
}

/// `LoginCompressionS2c { threshold: VarInt }`
pub fn decode_set_compression(body: &[u8]) -> Result<i32, ScanError> {
    Cursor::new(body).read_varint()
}

/// `LoginDisconnectS2c { reason }` — the reason text component is carried
/// as a raw JSON string at this protocol stage, same as the SLP status
/// `description` field; callers preserve it verbatim for UI rendering.
pub fn decode_login_disconnect(body: &[u8]) -> Result<String, ScanError> {
    Cursor::new(body).read_string()
}

// ── Play state ───────────────────────────────────────────────────────────

pub struct SpawnPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub teleport_id: i32,
}

/// `PlayerPositionLookS2c { position: DVec3, yaw, pitch, flags, teleport_id }`
pub fn decode_player_position(body: &[u8]) -> Result<SpawnPosition, ScanError> {
    let mut c = Cursor::new(body);
    let x = c.read_f64()?;
    let y = c.read_f64()?;
    let z = c.read_f64()?;
    let _yaw = c.read_f32()?;
    let _pitch = c.read_f32()?;
    let _flags = c.read_u8()?;
    let teleport_id = c.read_varint()?;
    Ok(SpawnPosition { x, y, z, teleport_id })
}

/// `TeleportConfirmC2s { teleport_id: VarInt }`
pub fn encode_teleport_confirm(teleport_id: i32) -> Vec<u8> {
    let mut body = Vec::new();
    encode_varint(teleport_id, &mut body);
    body
}

/// `DisconnectS2c { reason }`, same raw-string treatment as the login-state
/// disconnect.
pub fn decode_play_disconnect(body: &[u8]) -> Result<String, ScanError> {
    Cursor::new(body).read_string()
}

/// System chat message: `{ content: text component (as raw string),
/// overlay: bool }`.
pub fn decode_system_chat(body: &[u8]) -> Result<(String, bool), ScanError> {
    let mut c = Cursor::new(body);
    let content = c.read_string()?;
    let overlay = c.read_u8()? != 0;
    Ok((content, overlay))
}

/// Unsigned chat command, sent without any per-argument signatures — the
/// agent only ever issues deterministic auto-auth commands, never player
/// content that would need to round-trip through a signed-chat client.
pub fn encode_chat_command(command: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode_string(command, &mut body);
    body.extend_from_slice(&0u64.to_be_bytes()); // timestamp
    body.extend_from_slice(&0u64.to_be_bytes()); // salt
    encode_varint(0, &mut body); // argument signatures, none
    body.push(0); // message_count acknowledgment offset
    body.extend_from_slice(&[0u8; 3]); // acknowledged bitset (20 bits, 3 bytes is enough for all-zero)
    body
}

/// Plain chat message (non-command), same unsigned shape.
pub fn encode_chat_message(message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode_string(message, &mut body);
    body.extend_from_slice(&0u64.to_be_bytes());
    body.extend_from_slice(&0u64.to_be_bytes());
    body.push(0); // no signature
    body.push(0); // signed_preview = false
    body.extend_from_slice(&[0u8; 3]);
    body
}

/// `RequestCommandCompletionsC2s { transaction_id, text }`
pub fn encode_tab_complete_request(transaction_id: i32, text: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode_varint(transaction_id, &mut body);
    encode_string(text, &mut body);
    body
}

pub struct TabCompleteResponse {
    pub transaction_id: i32,
    pub matches: Vec<String>,
}

/// `CommandSuggestionsS2c { id, start, length, matches }`
pub fn decode_tab_complete_response(body: &[u8]) -> Result<TabCompleteResponse, ScanError> {
    let mut c = Cursor::new(body);
    let transaction_id = c.read_varint()?;
    let _start = c.read_varint()?;
    let _length = c.read_varint()?;
    let count = c.read_varint()?;
    let mut matches = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count.max(0) {
        matches.push(c.read_string()?);
        if c.read_bool()? {
            let _tooltip = c.read_string()?;
        }
    }
    Ok(TabCompleteResponse {
        transaction_id,
        matches,
    })
}

// ── declare_commands ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CommandNode {
    pub name: Option<String>,
    pub is_literal: bool,
    pub children: Vec<i32>,
}

/// `CommandTreeS2c { commands: Vec<Node>, root_index }` — node type/parser
/// decoding mirrors the real wire format closely enough to stay aligned
/// across entries, but argument parser *properties* are only skipped, never
/// interpreted: the plugin detector cares solely about node names.
pub fn decode_command_tree(body: &[u8]) -> Result<(Vec<CommandNode>, i32), ScanError> {
    let mut c = Cursor::new(body);
    let count = c.read_varint()?;
    let mut nodes = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count.max(0) {
        nodes.push(decode_node(&mut c)?);
    }
    let root_index = c.read_varint()?;
    Ok((nodes, root_index))
}

fn decode_node(c: &mut Cursor) -> Result<CommandNode, ScanError> {
    let flags = c.read_u8()?;
    let node_type = flags & 0x03;
    let has_redirect = flags & 0x08 != 0;
    let has_suggestion = flags & 0x10 != 0;

    let child_count = c.read_varint()?;
    let mut children = Vec::with_capacity(child_count.max(0) as usize);
    for _ in 0..child_count.max(0) {
        children.push(c.read_varint()?);
    }

    if has_redirect {
        let _redirect_node = c.read_varint()?;
    }

    let name = match node_type {
        0 => None,
        1 => Some(c.read_string()?),
        2 => {
            let name = c.read_string()?;
            skip_parser_properties(c)?;
            if has_suggestion {
                let _suggestion_type = c.read_string()?;
            }
            Some(name)
        }
        other => return Err(ScanError::Protocol(format!("unknown command node type {other}"))),
    };

    Ok(CommandNode {
        name,
        is_literal: node_type == 1,
        children,
    })
}

/// Skip the variable-length trailing data for each of the vanilla command
/// parser ids, per the 0-47 table used by the command tree packet.
fn skip_parser_properties(c: &mut Cursor) -> Result<(), ScanError> {
    fn skip_min_max(c: &mut Cursor, width: usize) -> Result<(), ScanError> {
        let flags = c.read_u8()?;
        if flags & 0x1 != 0 {
            c.skip(width)?;
        }
        if flags & 0x2 != 0 {
            c.skip(width)?;
        }
        Ok(())
    }

    let id = c.read_u8()?;
    match id {
        0 => {}                             // bool
        1 => skip_min_max(c, 4)?,           // float
        2 => skip_min_max(c, 8)?,           // double
        3 => skip_min_max(c, 4)?,           // integer
        4 => skip_min_max(c, 8)?,           // long
        5 => {
            c.read_varint()?;               // string arg kind
        }
        6 => {
            c.read_u8()?;                   // entity flags
        }
        29 => {
            c.read_u8()?;                   // score_holder allow_multiple
        }
        41..=44 => {
            c.read_string()?;               // registry identifier
        }
        7..=28 | 30..=40 | 45..=47 => {}     // no extra data
        other => return Err(ScanError::Protocol(format!("unknown command parser id {other}"))),
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────

fn encode_byte_array(data: &[u8], out: &mut Vec<u8>) {
    encode_varint(data.len() as i32, out);
    out.extend_from_slice(data);
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ScanError> {
        let end = self.pos.checked_add(n).ok_or_else(|| ScanError::Protocol("field length overflow".into()))?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| ScanError::Protocol("truncated packet body".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), ScanError> {
        self.read_bytes(n).map(|_| ())
    }

    fn read_u8(&mut self) -> Result<u8, ScanError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool, ScanError> {
        Ok(self.read_u8()? != 0)
    }

    fn read_varint(&mut self) -> Result<i32, ScanError> {
        let (value, consumed) = read_varint(&self.buf[self.pos..]).map_err(|e| match e {
            VarIntReadError::Incomplete => ScanError::Protocol("truncated varint field".into()),
            VarIntReadError::TooLarge => ScanError::Protocol("oversize varint field".into()),
        })?;
        self.pos += consumed;
        Ok(value)
    }

    fn read_byte_array(&mut self) -> Result<Vec<u8>, ScanError> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(ScanError::Protocol("negative byte array length".into()));
        }
        Ok(self.read_bytes(len as usize)?.to_vec())
    }

    fn read_string(&mut self) -> Result<String, ScanError> {
        let bytes = self.read_byte_array()?;
        String::from_utf8(bytes).map_err(|e| ScanError::Protocol(format!("non-UTF-8 string field: {e}")))
    }

    fn read_f32(&mut self) -> Result<f32, ScanError> {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(self.read_bytes(4)?);
        Ok(f32::from_be_bytes(arr))
    }

    fn read_f64(&mut self) -> Result<f64, ScanError> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.read_bytes(8)?);
        Ok(f64::from_be_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_hello_round_trips_username() {
        let body = encode_login_hello("Steve", None);
        let mut c = Cursor::new(&body);
        assert_eq!(c.read_string().unwrap(), "Steve");
        assert!(!c.read_bool().unwrap());
    }

    #[test]
    fn encryption_request_parses_keys() {
        let mut body = Vec::new();
        encode_string("", &mut body);
        encode_byte_array(&[1, 2, 3], &mut body);
        encode_byte_array(&[4, 5], &mut body);
        let req = decode_encryption_request(&body).unwrap();
        assert_eq!(req.public_key, vec![1, 2, 3]);
        assert_eq!(req.verify_token, vec![4, 5]);
    }

    #[test]
    fn login_success_parses_uuid_and_username() {
        let uuid = Uuid::new_v4();
        let mut body = Vec::new();
        body.extend_from_slice(uuid.as_bytes());
        encode_string("Alex", &mut body);
        encode_varint(0, &mut body); // empty properties array
        let success = decode_login_success(&body).unwrap();
        assert_eq!(success.uuid, uuid);
        assert_eq!(success.username, "Alex");
    }

    #[test]
    fn command_tree_extracts_plugin_prefixed_literal() {
        // root (index 1 child) -> literal "essentials:help"
        let mut body = Vec::new();
        encode_varint(2, &mut body); // 2 nodes

        // node 0: root, one child (index 1)
        body.push(0x00);
        encode_varint(1, &mut body);
        encode_varint(1, &mut body);

        // node 1: literal "essentials:help", executable
        body.push(0x01 | 0x04);
        encode_varint(0, &mut body);
        encode_string("essentials:help", &mut body);

        encode_varint(0, &mut body); // root_index

        let (nodes, root_index) = decode_command_tree(&body).unwrap();
        assert_eq!(root_index, 0);
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].name.is_none());
        assert_eq!(nodes[1].name.as_deref(), Some("essentials:help"));
        assert!(nodes[1].is_literal);
    }

    #[test]
    fn command_tree_skips_argument_with_min_max() {
        let mut body = Vec::new();
        encode_varint(1, &mut body);
        body.push(0x02); // argument node, no redirect, no suggestion
        encode_varint(0, &mut body); // no children
        encode_string("amount", &mut body);
        body.push(3); // parser id 3 = integer
        body.push(0x03); // both min and max present
        body.extend_from_slice(&1i32.to_be_bytes());
        body.extend_from_slice(&64i32.to_be_bytes());
        encode_varint(0, &mut body); // root_index
        let (nodes, _) = decode_command_tree(&body).unwrap();
        assert_eq!(nodes[0].name.as_deref(), Some("amount"));
    }

    #[test]
    fn tab_complete_response_parses_matches() {
        let mut body = Vec::new();
        encode_varint(7, &mut body); // transaction id
        encode_varint(0, &mut body); // start
        encode_varint(4, &mut body); // length
        encode_varint(2, &mut body); // count
        encode_string("help", &mut body);
        body.push(0); // no tooltip
        encode_string("home", &mut body);
        body.push(0);
        let resp = decode_tab_complete_response(&body).unwrap();
        assert_eq!(resp.transaction_id, 7);
        assert_eq!(resp.matches, vec!["help", "home"]);
    }
}
