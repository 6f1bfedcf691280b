//! SOCKS4/5 CONNECT handshake, implemented directly against
//! RFC 1928 (SOCKS5) and the de-facto SOCKS4 wire format rather than
//! delegated to a socks client crate — the `ProxyError`/`NetworkError`
//! split and explicit 10s connect timeout are load-bearing for callers and
//! easiest to guarantee against hand-written framing.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ScanError;
use crate::model::{Proxy, ProxyProtocol};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

async fn connect_to_proxy(proxy: &Proxy) -> Result<TcpStream, ScanError> {
    let addr = format!("{}:{}", proxy.host, proxy.port);
    tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| ScanError::Proxy(format!("timed out connecting to proxy {addr}")))?
        .map_err(|e| ScanError::Proxy(format!("failed to connect to proxy {addr}: {e}")))
}

/// Open a SOCKS CONNECT tunnel through `proxy` to `dest_host:dest_port`.
/// The proxy performs DNS resolution of `dest_host` (we forward the
/// hostname, never a pre-resolved IP, unless the caller passes one).
pub async fn dial_tcp(proxy: &Proxy, dest_host: &str, dest_port: u16) -> Result<TcpStream, ScanError> {
    let mut stream = connect_to_proxy(proxy).await?;
    match proxy.protocol {
        ProxyProtocol::Socks4 => socks4_connect(&mut stream, dest_host, dest_port).await?,
        ProxyProtocol::Socks5 => socks5_connect(&mut stream, proxy, dest_host, dest_port).await?,
    }
    Ok(stream)
}

// ── SOCKS4 ───────────────────────────────────────────────────────────────────
// SOCKS4a CONNECT: VER=4, CMD=1, DSTPORT, DSTIP=0.0.0.1 (signals SOCKS4a),
// USERID=\0, then the hostname null-terminated.

async fn socks4_connect(stream: &mut TcpStream, host: &str, port: u16) -> Result<(), ScanError> {
    let mut req = Vec::with_capacity(16 + host.len());
    req.push(0x04); // VER
    req.push(0x01); // CMD = CONNECT
    req.extend_from_slice(&port.to_be_bytes());
    req.extend_from_slice(&[0, 0, 0, 1]); // invalid IP triggers SOCKS4a hostname resolution
    req.push(0x00); // empty USERID
    req.extend_from_slice(host.as_bytes());
    req.push(0x00);

    stream
        .write_all(&req)
        .await
        .map_err(|e| ScanError::Proxy(format!("SOCKS4 request write failed: {e}")))?;

    let mut resp = [0u8; 8];
    stream
        .read_exact(&mut resp)
        .await
        .map_err(|e| ScanError::Proxy(format!("SOCKS4 response read failed: {e}")))?;

    if resp[0] != 0x00 {
        return Err(ScanError::Proxy(format!(
            "SOCKS4 response had unexpected version byte {}",
            resp[0]
        )));
    }
    if resp[1] != 0x5a {
        return Err(ScanError::Proxy(format!(
            "SOCKS4 CONNECT rejected, status=0x{:02x}",
            resp[1]
        )));
    }
    Ok(())
}

// ── SOCKS5 ───────────────────────────────────────────────────────────────────

async fn socks5_connect(
    stream: &mut TcpStream,
    proxy: &Proxy,
    host: &str,
    port: u16,
) -> Result<(), ScanError> {
    socks5_handshake(stream, proxy).await?;

    // CONNECT request with ATYP=0x03 (domain name) so the proxy resolves.
    let mut req = Vec::with_capacity(7 + host.len());
    req.extend_from_slice(&[0x05, 0x01, 0x00, 0x03]);
    req.push(host.len() as u8);
    req.extend_from_slice(host.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());

    stream
        .write_all(&req)
        .await
        .map_err(|e| ScanError::Proxy(format!("SOCKS5 request write failed: {e}")))?;

    let mut head = [0u8; 4];
    stream
        .read_exact(&mut head)
        .await
        .map_err(|e| ScanError::Proxy(format!("SOCKS5 response read failed: {e}")))?;

    if head[0] != 0x05 {
        return Err(ScanError::Proxy("SOCKS5 response had bad version".into()));
    }
    if head[1] != 0x00 {
        return Err(ScanError::Proxy(format!(
            "SOCKS5 CONNECT rejected, reply=0x{:02x}",
            head[1]
        )));
    }

    // Consume and discard BND.ADDR/BND.PORT before the tunnel is usable.
    match head[3] {
        0x01 => {
            let mut rest = [0u8; 4 + 2];
            stream.read_exact(&mut rest).await?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut rest = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut rest).await?;
        }
        0x04 => {
            let mut rest = [0u8; 16 + 2];
            stream.read_exact(&mut rest).await?;
        }
        other => {
            return Err(ScanError::Proxy(format!(
                "SOCKS5 response had unknown ATYP {other}"
            )))
        }
    }
    Ok(())
}

async fn socks5_handshake(stream: &mut TcpStream, proxy: &Proxy) -> Result<(), ScanError> {
    let want_auth = proxy.username.is_some() && proxy.password.is_some();
    let methods: &[u8] = if want_auth { &[0x00, 0x02] } else { &[0x00] };

    let mut greeting = Vec::with_capacity(2 + methods.len());
    greeting.push(0x05);
    greeting.push(methods.len() as u8);
    greeting.extend_from_slice(methods);
    stream
        .write_all(&greeting)
        .await
        .map_err(|e| ScanError::Proxy(format!("SOCKS5 greeting write failed: {e}")))?;

    let mut resp = [0u8; 2];
    stream
        .read_exact(&mut resp)
        .await
        .map_err(|e| ScanError::Proxy(format!("SOCKS5 greeting read failed: {e}")))?;

    if resp[0] != 0x05 {
        return Err(ScanError::Proxy("SOCKS5 greeting had bad version".into()));
    }

    match resp[1] {
        0x00 => Ok(()),
        0x02 => socks5_userpass_auth(stream, proxy).await,
        0xff => Err(ScanError::Proxy(
            "SOCKS5 proxy rejected all auth methods".into(),
        )),
        other => Err(ScanError::Proxy(format!(
            "SOCKS5 proxy selected unsupported auth method {other}"
        ))),
    }
}

async fn socks5_userpass_auth(stream: &mut TcpStream, proxy: &Proxy) -> Result<(), ScanError> {
    let user = proxy.username.as_deref().unwrap_or_default();
    let pass = proxy.password.as_deref().unwrap_or_default();

    let mut req = Vec::with_capacity(3 + user.len() + pass.len());
    req.push(0x01); // auth sub-negotiation version
    req.push(user.len() as u8);
    req.extend_from_slice(user.as_bytes());
    req.push(pass.len() as u8);
    req.extend_from_slice(pass.as_bytes());

    stream
        .write_all(&req)
        .await
        .map_err(|e| ScanError::Proxy(format!("SOCKS5 auth write failed: {e}")))?;

    let mut resp = [0u8; 2];
    stream
        .read_exact(&mut resp)
        .await
        .map_err(|e| ScanError::Proxy(format!("SOCKS5 auth read failed: {e}")))?;

    if resp[1] != 0x00 {
        return Err(ScanError::Proxy("SOCKS5 username/password auth rejected".into()));
    }
    Ok(())
}
