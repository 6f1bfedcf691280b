//! SSRF guard.
//!
//! Shared between the coordinator's batch-insertion path and the agent's
//! resolve step — both must reject the same set of private/reserved
//! ranges and hostnames before a target is ever dialed.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};

use crate::error::ScanError;

const CGNAT: (Ipv4Addr, u8) = (Ipv4Addr::new(100, 64, 0, 0), 10);
const METADATA_IP: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

fn cgnat_net() -> Ipv4Net {
    Ipv4Net::new(CGNAT.0, CGNAT.1).unwrap()
}

/// True if `ip` falls in a range that must never be dialed by a scan.
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private() // RFC1918
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_documentation() // TEST-NET-1/2/3
                || v4.is_unspecified()
                || *v4 == METADATA_IP
                || cgnat_net().contains(v4)
                || is_reserved_v4(v4)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || is_unique_local_v6(v6)
                || is_link_local_v6(v6)
        }
    }
}

fn is_reserved_v4(v4: &Ipv4Addr) -> bool {
    // 240.0.0.0/4 reserved for future use.
    v4.octets()[0] >= 240
}

fn is_unique_local_v6(v6: &Ipv6Addr) -> bool {
    Ipv6Net::new(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7)
        .unwrap()
        .contains(v6)
}

fn is_link_local_v6(v6: &Ipv6Addr) -> bool {
    Ipv6Net::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10)
        .unwrap()
        .contains(v6)
}

/// True for literal hostnames that must be rejected without ever resolving
/// them: `localhost`, `0.0.0.0`, and anything ending in `.local`.
pub fn is_blocked_hostname(host: &str) -> bool {
    let lower = host.to_ascii_lowercase();
    lower == "localhost" || lower == "0.0.0.0" || lower.ends_with(".local")
}

pub fn assert_public(ip: &IpAddr, original_host: &str) -> Result<(), ScanError> {
    if is_blocked_ip(ip) || is_blocked_hostname(original_host) {
        return Err(ScanError::PrivateIp(original_host.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn blocks_known_private_and_reserved_addresses() {
        for addr in [
            "127.0.0.1",
            "10.0.0.5",
            "169.254.169.254",
            "fe80::1",
            "100.64.0.1",
        ] {
            assert!(is_blocked_ip(&ip(addr)), "expected {addr} to be blocked");
        }
    }

    #[test]
    fn blocks_literal_hostnames() {
        assert!(is_blocked_hostname("localhost"));
        assert!(is_blocked_hostname("LOCALHOST"));
        assert!(is_blocked_hostname("0.0.0.0"));
        assert!(is_blocked_hostname("printer.local"));
        assert!(!is_blocked_hostname("mc.example.com"));
    }

    #[test]
    fn allows_ordinary_public_addresses() {
        // 192.0.2.0/24 is TEST-NET-1, deliberately blocked by
        // `is_documentation()` above per the spec's own "test-nets" entry
        // in the blocked-range list, despite showing up as a public address
        // in spec.md's illustrative §8 scenario.
        assert!(!is_blocked_ip(&ip("8.8.8.8")));
    }

    #[test]
    fn blocks_ipv6_ula_and_multicast() {
        assert!(is_blocked_ip(&ip("fc00::1")));
        assert!(is_blocked_ip(&ip("ff02::1")));
    }
}
