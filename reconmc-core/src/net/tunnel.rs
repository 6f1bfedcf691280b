//! SOCKS-tunneled HTTPS client.
//!
//! Wraps the raw tunneled TCP stream with TLS (SNI = destination hostname)
//! and speaks a minimal HTTP/1.1 request/response cycle, fully buffering
//! the body for `.json()`/`.text()`. `reqwest` can't be pointed at an
//! arbitrary pre-established `TcpStream` without a custom hyper connector,
//! so this ~100-line client is hand-rolled rather than fighting that API —
//! the wire format itself (HTTP/1.1, `Connection: close`) is trivial.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use url::Url;

use crate::error::ScanError;
use crate::model::Proxy;

use super::socks;

pub const HTTPS_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Tunnel<'a> {
    proxy: &'a Proxy,
}

pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> Result<String, ScanError> {
        String::from_utf8(self.body.clone())
            .map_err(|e| ScanError::Protocol(format!("response body is not valid UTF-8: {e}")))
    }

    pub fn json(&self) -> Result<Value, ScanError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ScanError::Protocol(format!("response body is not valid JSON: {e}")))
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

impl<'a> Tunnel<'a> {
    pub fn new(proxy: &'a Proxy) -> Self {
        Self { proxy }
    }

    /// Open a plain (non-TLS) TCP tunnel, e.g. for the SLP protocol itself.
    pub async fn dial_tcp(&self, host: &str, port: u16) -> Result<tokio::net::TcpStream, ScanError> {
        socks::dial_tcp(self.proxy, host, port).await
    }

    pub async fn https_request(
        &self,
        url: &str,
        method: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, ScanError> {
        let parsed = Url::parse(url).map_err(|e| ScanError::Validation(format!("bad URL: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ScanError::Validation("URL has no host".into()))?
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(443);
        let path = if parsed.query().is_some() {
            format!("{}?{}", parsed.path(), parsed.query().unwrap())
        } else {
            parsed.path().to_string()
        };

        let fut = async {
            let tcp = socks::dial_tcp(self.proxy, &host, port).await?;
            let connector = tls_connector();
            let server_name = ServerName::try_from(host.clone())
                .map_err(|e| ScanError::Tls(format!("invalid SNI host {host}: {e}")))?;
            let mut tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| ScanError::Tls(format!("TLS handshake failed: {e}")))?;

            let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n");
            for (k, v) in headers {
                req.push_str(&format!("{k}: {v}\r\n"));
            }
            if let Some(b) = body {
                req.push_str(&format!("Content-Length: {}\r\n", b.len()));
            }
            req.push_str("\r\n");

            tls.write_all(req.as_bytes())
                .await
                .map_err(|e| ScanError::Network(format!("write failed: {e}")))?;
            if let Some(b) = body {
                tls.write_all(b)
                    .await
                    .map_err(|e| ScanError::Network(format!("write body failed: {e}")))?;
            }

            let mut raw = Vec::new();
            tls.read_to_end(&mut raw)
                .await
                .map_err(|e| ScanError::Network(format!("read failed: {e}")))?;

            parse_http_response(&raw)
        };

        tokio::time::timeout(HTTPS_TIMEOUT, fut)
            .await
            .map_err(|_| ScanError::Network("HTTPS request timed out".into()))?
    }

    pub async fn https_get_json(&self, url: &str) -> Result<Value, ScanError> {
        self.https_request(url, "GET", &[("Accept", "application/json")], None)
            .await?
            .json()
    }
}

fn parse_http_response(raw: &[u8]) -> Result<HttpResponse, ScanError> {
    let sep = b"\r\n\r\n";
    let split_at = raw
        .windows(4)
        .position(|w| w == sep)
        .ok_or_else(|| ScanError::Protocol("malformed HTTP response: no header/body split".into()))?;

    let header_text = std::str::from_utf8(&raw[..split_at])
        .map_err(|e| ScanError::Protocol(format!("HTTP headers are not valid UTF-8: {e}")))?;
    let mut lines = header_text.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| ScanError::Protocol("missing HTTP status line".into()))?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ScanError::Protocol(format!("unparseable status line: {status_line}")))?;

    let chunked = lines.clone().any(|l| {
        l.to_ascii_lowercase()
            .starts_with("transfer-encoding: chunked")
    });

    let body_start = split_at + 4;
    let body = if chunked {
        dechunk(&raw[body_start..])?
    } else {
        raw[body_start..].to_vec()
    };

    Ok(HttpResponse { status, body })
}

fn dechunk(mut buf: &[u8]) -> Result<Vec<u8>, ScanError> {
    let mut out = Vec::new();
    loop {
        let line_end = buf
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| ScanError::Protocol("truncated chunk size line".into()))?;
        let size_line = std::str::from_utf8(&buf[..line_end])
            .map_err(|e| ScanError::Protocol(format!("bad chunk size: {e}")))?;
        let size = usize::from_str_radix(size_line.trim(), 16)
            .map_err(|e| ScanError::Protocol(format!("bad chunk size: {e}")))?;
        buf = &buf[line_end + 2..];
        if size == 0 {
            break;
        }
        if buf.len() < size {
            return Err(ScanError::Protocol("truncated chunk body".into()));
        }
        out.extend_from_slice(&buf[..size]);
        buf = &buf[size + 2..]; // skip trailing CRLF
    }
    Ok(out)
}
