//! Minecraft bot login: handshake into the login state, the encryption and
//! session-join exchange for online-mode servers, then enough of the play
//! state to report a spawn and watch chat for cracked-account auto-auth
//! prompts.
//!
//! Grounded in the server-side `login_online` handshake (inverted for the
//! client's perspective here) and the packet field shapes it reads/writes;
//! see [`crypto`] and [`packet`] for the per-piece citations.

pub mod crypto;
pub mod packet;

use std::time::Duration;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

use reconmc_core::error::ScanError;
use reconmc_core::net::tunnel::Tunnel;
use reconmc_core::slp::varint::{encode_varint, read_varint, VarIntReadError};

use crypto::PacketCipher;
use packet::{login, play, CommandNode};

const BOT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const COMPRESS_IF_AT_LEAST: i32 = 256;

/// Low-level packet transport: VarInt framing, optional zlib compression,
/// optional AES-128/CFB8 encryption — in that order on the wire, same as
/// vanilla (compress the payload, then encrypt the whole frame).
pub struct BotConnection {
    stream: TcpStream,
    cipher: Option<PacketCipher>,
    compression_threshold: Option<i32>,
    read_buf: Vec<u8>,
}

impl BotConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            cipher: None,
            compression_threshold: None,
            read_buf: Vec::new(),
        }
    }

    pub fn enable_encryption(&mut self, key: &[u8; 16]) {
        self.cipher = Some(PacketCipher::new(key));
    }

    pub fn set_compression(&mut self, threshold: i32) {
        self.compression_threshold = Some(threshold);
    }

    pub async fn send(&mut self, packet_id: i32, body: Vec<u8>) -> Result<(), ScanError> {
        let mut payload = Vec::with_capacity(body.len() + 4);
        encode_varint(packet_id, &mut payload);
        payload.extend_from_slice(&body);

        let mut frame = Vec::new();
        match self.compression_threshold {
            None => frame = payload,
            Some(threshold) => {
                if payload.len() as i32 >= threshold {
                    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
                    enc.write_all(&payload)
                        .map_err(|e| ScanError::Protocol(format!("compression failed: {e}")))?;
                    let compressed = enc
                        .finish()
                        .map_err(|e| ScanError::Protocol(format!("compression failed: {e}")))?;
                    encode_varint(payload.len() as i32, &mut frame);
                    frame.extend_from_slice(&compressed);
                } else {
                    encode_varint(0, &mut frame);
                    frame.extend_from_slice(&payload);
                }
            }
        }

        let mut out = Vec::with_capacity(frame.len() + 5);
        encode_varint(frame.len() as i32, &mut out);
        out.extend_from_slice(&frame);

        if let Some(cipher) = &mut self.cipher {
            cipher.encrypt(&mut out);
        }

        self.stream
            .write_all(&out)
            .await
            .map_err(|e| ScanError::Network(format!("bot write failed: {e}")))?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<(i32, Vec<u8>), ScanError> {
        loop {
            if let Some(result) = self.try_parse_frame()? {
                return Ok(result);
            }
            let mut chunk = [0u8; 4096];
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(|e| ScanError::Network(format!("bot read failed: {e}")))?;
            if n == 0 {
                return Err(ScanError::Network("connection closed by server".into()));
            }
            let mut data = chunk[..n].to_vec();
            if let Some(cipher) = &mut self.cipher {
                cipher.decrypt(&mut data);
            }
            self.read_buf.extend_from_slice(&data);
        }
    }

    fn try_parse_frame(&mut self) -> Result<Option<(i32, Vec<u8>)>, ScanError> {
        let (frame_len, hdr_len) = match read_varint(&self.read_buf) {
            Ok(v) => v,
            Err(VarIntReadError::Incomplete) => return Ok(None),
            Err(VarIntReadError::TooLarge) => {
                return Err(ScanError::Protocol("frame VarInt too large".into()))
            }
        };
        let frame_len = frame_len as usize;
        let frame_end = hdr_len + frame_len;
        if self.read_buf.len() < frame_end {
            return Ok(None);
        }
        let frame = self.read_buf[hdr_len..frame_end].to_vec();
        self.read_buf.drain(..frame_end);

        let payload = match self.compression_threshold {
            None => frame,
            Some(_) => {
                let (data_len, n) = read_varint(&frame)
                    .map_err(|_| ScanError::Protocol("truncated compression header".into()))?;
                let body = &frame[n..];
                if data_len == 0 {
                    body.to_vec()
                } else {
                    let mut decoder = ZlibDecoder::new(body);
                    let mut out = Vec::with_capacity(data_len as usize);
                    decoder
                        .read_to_end(&mut out)
                        .map_err(|e| ScanError::Protocol(format!("decompression failed: {e}")))?;
                    out
                }
            }
        };

        let (packet_id, id_len) = read_varint(&payload)
            .map_err(|_| ScanError::Protocol("truncated packet id".into()))?;
        Ok(Some((packet_id, payload[id_len..].to_vec())))
    }
}

/// Everything the executor needs out of a successful bot session.
pub struct BotSpawn {
    pub uuid: Uuid,
    pub username: String,
    pub spawn_x: f64,
    pub spawn_y: f64,
    pub spawn_z: f64,
    pub command_nodes: Vec<CommandNode>,
    pub command_root_index: i32,
}

pub enum LoginFailure {
    Kicked(String),
    AccountMismatch,
    Protocol(ScanError),
}

impl From<ScanError> for LoginFailure {
    fn from(e: ScanError) -> Self {
        LoginFailure::Protocol(e)
    }
}

/// Login credentials for the bot connect stage. Online-mode servers require
/// a Microsoft `access_token`; offline/cracked servers accept any username.
pub struct BotAccount<'a> {
    pub username: &'a str,
    pub uuid: Option<Uuid>,
    pub access_token: Option<&'a str>,
}

/// Dial the server through `proxy`, perform the handshake + login
/// sequence, and drain packets until the first `PlayerPositionAndLook`
/// (spawn) arrives, buffering any `declare_commands` tree seen along the
/// way regardless of arrival order relative to spawn. Returns the live
/// connection alongside the spawn summary so callers can keep driving the
/// play state afterward (plugin detection, anti-auth chat watch).
pub async fn connect_and_spawn(
    proxy: &reconmc_core::model::Proxy,
    host: &str,
    port: u16,
    server_address_for_handshake: &str,
    protocol_version: i32,
    account: &BotAccount<'_>,
    online_mode: bool,
) -> Result<(BotConnection, BotSpawn), LoginFailure> {
    let fut = connect_and_spawn_inner(
        proxy,
        host,
        port,
        server_address_for_handshake,
        protocol_version,
        account,
        online_mode,
    );
    tokio::time::timeout(BOT_CONNECT_TIMEOUT, fut)
        .await
        .map_err(|_| LoginFailure::Protocol(ScanError::Network("bot connect timed out".into())))?
}

async fn connect_and_spawn_inner(
    proxy: &reconmc_core::model::Proxy,
    host: &str,
    port: u16,
    server_address_for_handshake: &str,
    protocol_version: i32,
    account: &BotAccount<'_>,
    online_mode: bool,
) -> Result<(BotConnection, BotSpawn), LoginFailure> {
    let tunnel = Tunnel::new(proxy);
    let tcp = tunnel.dial_tcp(host, port).await?;
    let mut conn = BotConnection::new(tcp);

    // Handshake directly into the login state (next_state=2); the SLP
    // handshake builder only knows next_state=1 (status), so login dials
    // its own copy of the same frame shape.
    let handshake = encode_login_handshake(protocol_version, server_address_for_handshake, port);
    conn.stream
        .write_all(&handshake)
        .await
        .map_err(|e| ScanError::Network(format!("handshake write failed: {e}")))?;

    let hello = packet::encode_login_hello(account.username, account.uuid);
    conn.send(login::HELLO_C2S, hello).await?;

    loop {
        let (packet_id, body) = conn.recv().await?;
        match packet_id {
            login::DISCONNECT_S2C => {
                let reason = packet::decode_login_disconnect(&body)?;
                return Err(LoginFailure::Kicked(reason));
            }
            login::ENCRYPTION_REQUEST_S2C => {
                if !online_mode {
                    return Err(LoginFailure::Protocol(ScanError::Protocol(
                        "server requested encryption but is not being treated as online-mode".into(),
                    )));
                }
                let Some(access_token) = account.access_token else {
                    return Err(LoginFailure::AccountMismatch);
                };
                complete_encryption_handshake(&mut conn, &body, account.username, access_token, proxy)
                    .await?;
            }
            login::SET_COMPRESSION_S2C => {
                let threshold = packet::decode_set_compression(&body)?;
                conn.set_compression(threshold);
            }
            login::SUCCESS_S2C => {
                let success = packet::decode_login_success(&body)?;
                debug!(username = %success.username, uuid = %success.uuid, "login succeeded");
                let spawn = drain_until_spawn(&mut conn, success).await?;
                return Ok((conn, spawn));
            }
            other => {
                debug!(packet_id = other, "ignoring unexpected login-state packet");
            }
        }
    }
}

async fn complete_encryption_handshake(
    conn: &mut BotConnection,
    body: &[u8],
    username: &str,
    access_token: &str,
    proxy: &reconmc_core::model::Proxy,
) -> Result<(), LoginFailure> {
    let request = packet::decode_encryption_request(body)?;
    let public_key = crypto::parse_server_public_key(&request.public_key)?;

    let shared_secret = crypto::random_shared_secret();
    let encrypted_secret = crypto::rsa_encrypt(&public_key, &shared_secret)?;
    let encrypted_verify_token = crypto::rsa_encrypt(&public_key, &request.verify_token)?;

    conn.send(
        login::KEY_C2S,
        packet::encode_login_key(&encrypted_secret, &encrypted_verify_token),
    )
    .await?;
    conn.enable_encryption(&shared_secret);

    let server_id = crypto::server_hash(&shared_secret, &request.public_key);
    join_session(proxy, access_token, username, &server_id)
        .await
        .map_err(LoginFailure::Protocol)?;
    Ok(())
}

/// `POST https://sessionserver.mojang.com/session/minecraft/join`, the
/// client-side counterpart of the session server's `hasJoined` GET the
/// server issues — verifies the player's account owns `access_token` and
/// binds it to the `server_id` hash both sides just derived. Dials through
/// the same proxy as the bot connection itself via reqwest's own SOCKS
/// support, not the hand-rolled tunnel (see `reconmc_core::net::build_proxy_client`).
async fn join_session(
    proxy: &reconmc_core::model::Proxy,
    access_token: &str,
    username: &str,
    server_id: &str,
) -> Result<(), ScanError> {
    let client = reconmc_core::net::build_proxy_client(proxy, Duration::from_secs(30))?;
    let resp = client
        .post("https://sessionserver.mojang.com/session/minecraft/join")
        .json(&serde_json::json!({
            "accessToken": access_token,
            "selectedProfile": username,
            "serverId": server_id,
        }))
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(ScanError::Auth(format!(
            "session join rejected, status {}",
            resp.status()
        )));
    }
    Ok(())
}

async fn drain_until_spawn(
    conn: &mut BotConnection,
    success: packet::LoginSuccess,
) -> Result<BotSpawn, LoginFailure> {
    let mut command_nodes = Vec::new();
    let mut command_root_index = 0;

    loop {
        let (packet_id, body) = conn.recv().await?;
        match packet_id {
            play::DISCONNECT_S2C => {
                let reason = packet::decode_play_disconnect(&body)?;
                return Err(LoginFailure::Kicked(reason));
            }
            play::JOIN_GAME_S2C => {
                debug!("join game received");
            }
            play::DECLARE_COMMANDS_S2C => {
                let (nodes, root) = packet::decode_command_tree(&body)?;
                command_nodes = nodes;
                command_root_index = root;
            }
            play::PLAYER_POSITION_S2C => {
                let spawn = packet::decode_player_position(&body)?;
                conn.send(
                    play::TELEPORT_CONFIRM_C2S,
                    packet::encode_teleport_confirm(spawn.teleport_id),
                )
                .await?;
                return Ok(BotSpawn {
                    uuid: success.uuid,
                    username: success.username,
                    spawn_x: spawn.x,
                    spawn_y: spawn.y,
                    spawn_z: spawn.z,
                    command_nodes,
                    command_root_index,
                });
            }
            _ => {}
        }
    }
}

/// `packetId=0x00, protocolVersion, serverAddress, port, nextState=2`
fn encode_login_handshake(protocol_version: i32, server_address: &str, port: u16) -> Vec<u8> {
    use reconmc_core::slp::varint::encode_string;
    const NEXT_STATE_LOGIN: i32 = 2;

    let mut body = Vec::new();
    encode_varint(0x00, &mut body);
    encode_varint(protocol_version, &mut body);
    encode_string(server_address, &mut body);
    body.extend_from_slice(&port.to_be_bytes());
    encode_varint(NEXT_STATE_LOGIN, &mut body);

    let mut out = Vec::with_capacity(body.len() + 5);
    encode_varint(body.len() as i32, &mut out);
    out.extend_from_slice(&body);
    out
}

/// One round of the anti-auth chat watch: read the next play-state packet,
/// and if it is a system chat message matching a registration/login prompt,
/// reply with `password` via the corresponding command. Returns `true` once
/// the same prompt has been seen twice (treated as an authentication
/// failure per the executor's step 7 semantics).
pub async fn watch_auto_auth_round(
    conn: &mut BotConnection,
    password: &str,
    last_prompt_seen: &mut Option<String>,
) -> Result<bool, ScanError> {
    let (packet_id, body) = conn.recv().await?;
    if packet_id != play::CHAT_S2C {
        return Ok(false);
    }
    let (text, _overlay) = packet::decode_system_chat(&body)?;
    let lower = text.to_ascii_lowercase();

    let command = if lower.contains("/register") {
        Some(format!("register {password} {password}"))
    } else if lower.contains("/login") {
        Some(format!("login {password}"))
    } else {
        None
    };

    let Some(command) = command else {
        return Ok(false);
    };

    if last_prompt_seen.as_deref() == Some(text.as_str()) {
        return Ok(true);
    }
    *last_prompt_seen = Some(text);
    conn.send(play::CHAT_COMMAND_C2S, packet::encode_chat_command(&command))
        .await?;
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_handshake_uses_next_state_login() {
        let pkt = encode_login_handshake(765, "mc.example.com", 25565);
        let (len, consumed) = read_varint(&pkt).unwrap();
        assert_eq!(len as usize, pkt.len() - consumed);
        // next_state is the final VarInt byte of the body for an
        // ASCII-only address: 0x02.
        assert_eq!(*pkt.last().unwrap(), 0x02);
    }
}
