//! Hostname resolution + SRV lookup with the SSRF guard applied to every
//! resolved address.

use std::net::IpAddr;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::error::ScanError;
use crate::ssrf::assert_public;

pub struct SrvTarget {
    pub host: String,
    pub port: u16,
}

fn resolver() -> Result<TokioAsyncResolver, ScanError> {
    TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        .map_err(|e| ScanError::Network(format!("failed to build resolver: {e}")))
}

/// Resolve `host` to an IPv4 address, rejecting anything the SSRF guard
/// flags. Direct IP-literal inputs are validated identically.
pub async fn resolve_ipv4(host: &str) -> Result<IpAddr, ScanError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        assert_public(&ip, host)?;
        return Ok(ip);
    }

    assert_public_hostname(host)?;

    let resolver = resolver()?;
    let response = resolver
        .ipv4_lookup(host)
        .await
        .map_err(|e| ScanError::Network(format!("DNS resolution failed for {host}: {e}")))?;

    let ip = response
        .iter()
        .next()
        .map(|a| IpAddr::V4(a.0))
        .ok_or_else(|| ScanError::Network(format!("no A records for {host}")))?;

    assert_public(&ip, host)?;
    Ok(ip)
}

/// SRV lookup for `_minecraft._tcp.<hostname>`. Only attempted when the
/// caller's port is 25565 and no proxy is in use (SRV is skipped over SOCKS
/// because the proxy performs DNS — step 2).
pub async fn lookup_srv(hostname: &str) -> Result<Option<SrvTarget>, ScanError> {
    let resolver = resolver()?;
    let name = format!("_minecraft._tcp.{hostname}");
    let lookup = match resolver.srv_lookup(&name).await {
        Ok(l) => l,
        Err(_) => return Ok(None),
    };
    let Some(record) = lookup.iter().next() else {
        return Ok(None);
    };
    let target = record.target().to_utf8();
    let target = target.trim_end_matches('.').to_string();
    Ok(Some(SrvTarget {
        host: target,
        port: record.port(),
    }))
}

fn assert_public_hostname(host: &str) -> Result<(), ScanError> {
    use crate::ssrf::is_blocked_hostname;
    if is_blocked_hostname(host) {
        return Err(ScanError::PrivateIp(host.to_string()));
    }
    Ok(())
}
