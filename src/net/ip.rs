//! IP address literal helpers (spec §4.C9's "literal IP addresses only
//! exact-match" rule, §4.C5's address-list ordering).
//!
//! Grounded in `examples/original_source/src/KDNetwork/ip_address.h`, which
//! wraps `sockaddr`/`inet_pton` behind a small value type. `std::net::IpAddr`
//! already covers that surface in Rust, so this module only adds the
//! cookie/DNS-specific predicates the original layered on top rather than
//! reimplementing the address type itself.

use std::net::IpAddr;

/// Whether `host` parses as a literal IPv4/IPv6 address (as opposed to a
/// DNS name). Used by cookie domain matching: per RFC 6265 §5.1.3, literal
/// IP addresses only match a cookie domain by exact string equality, never
/// by the subdomain suffix rule.
pub fn is_ip_literal(host: &str) -> bool {
    // Strip brackets so "[::1]" from a URI authority is still recognized.
    let trimmed = host.strip_prefix('[').and_then(|s| s.strip_suffix(']')).unwrap_or(host);
    trimmed.parse::<IpAddr>().is_ok()
}

/// Whether `addr` falls within `subnet/prefix_len` (both same address
/// family). Used by no spec.md operation directly, but kept as a small,
/// independently testable primitive the way
/// `IpAddress::isWithinSubnet` is in the original.
pub fn is_within_subnet(addr: &IpAddr, subnet: &IpAddr, prefix_len: u8) -> bool {
    match (addr, subnet) {
        (IpAddr::V4(a), IpAddr::V4(s)) => {
            let prefix_len = prefix_len.min(32);
            let mask = if prefix_len == 0 { 0u32 } else { u32::MAX << (32 - prefix_len) };
            (u32::from(*a) & mask) == (u32::from(*s) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(s)) => {
            let prefix_len = prefix_len.min(128);
            let mask = if prefix_len == 0 { 0u128 } else { u128::MAX << (128 - prefix_len) };
            (u128::from(*a) & mask) == (u128::from(*s) & mask)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_ipv4_and_ipv6_literals() {
        assert!(is_ip_literal("127.0.0.1"));
        assert!(is_ip_literal("::1"));
        assert!(is_ip_literal("[::1]"));
        assert!(!is_ip_literal("example.com"));
    }

    #[test]
    fn subnet_match_respects_prefix_length() {
        let addr: IpAddr = "192.168.1.42".parse().unwrap();
        let subnet: IpAddr = "192.168.1.0".parse().unwrap();
        assert!(is_within_subnet(&addr, &subnet, 24));
        let other: IpAddr = "192.168.2.0".parse().unwrap();
        assert!(!is_within_subnet(&addr, &other, 24));
    }
}
