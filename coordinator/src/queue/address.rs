//! Address parsing for `/api/servers/add`.

use reconmc_core::error::{Result, ScanError};
use reconmc_core::net::dns;

pub const DEFAULT_PORT: u16 = 25565;

#[derive(Debug, Clone)]
pub struct ParsedTarget {
    pub original: String,
    pub hostname: Option<String>,
    pub resolved_ip: std::net::IpAddr,
    pub port: u16,
}

/// Split `"host:port"` or bare `"host"` (default port 25565), resolve via
/// the shared SSRF-safe resolver, and return `None` for anything the guard
/// rejects — callers count those as skipped, not as an error.
pub async fn parse_and_resolve(raw: &str) -> Result<Option<ParsedTarget>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ScanError::Validation("empty server address".into()));
    }

    let (host, port) = split_host_port(raw)?;

    match dns::resolve_ipv4(&host).await {
        Ok(ip) => Ok(Some(ParsedTarget {
            original: raw.to_string(),
            hostname: if host.parse::<std::net::IpAddr>().is_ok() {
                None
            } else {
                Some(host)
            },
            resolved_ip: ip,
            port,
        })),
        Err(ScanError::PrivateIp(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn split_host_port(raw: &str) -> Result<(String, u16), ScanError> {
    // IPv6 literals use `[addr]:port`; bare IPv6 has no port suffix to split on.
    if let Some(rest) = raw.strip_prefix('[') {
        let Some((addr, tail)) = rest.split_once(']') else {
            return Err(ScanError::Validation(format!("malformed IPv6 address: {raw}")));
        };
        let port = match tail.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| ScanError::Validation(format!("invalid port in {raw}")))?,
            None => DEFAULT_PORT,
        };
        return Ok((addr.to_string(), port));
    }

    match raw.rsplit_once(':') {
        Some((host, port_str)) if !host.is_empty() && port_str.chars().all(|c| c.is_ascii_digit()) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| ScanError::Validation(format!("invalid port in {raw}")))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((raw.to_string(), DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_and_port() {
        assert_eq!(
            split_host_port("mc.example.com:25566").unwrap(),
            ("mc.example.com".to_string(), 25566)
        );
    }

    #[test]
    fn defaults_port_when_absent() {
        assert_eq!(
            split_host_port("mc.example.com").unwrap(),
            ("mc.example.com".to_string(), DEFAULT_PORT)
        );
    }

    #[test]
    fn handles_ipv6_literal_with_port() {
        assert_eq!(
            split_host_port("[::1]:25565").unwrap(),
            ("::1".to_string(), 25565)
        );
    }
}
