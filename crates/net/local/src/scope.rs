//! IP address scope classification.
//!
//! Classifies addresses by scope so that the announce policy can drop
//! anything unreachable from the public internet.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use libp2p::{Multiaddr, multiaddr::Protocol};

/// Classification of IP address scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressScope {
    /// Loopback addresses (127.0.0.0/8, ::1)
    Loopback,
    /// Private addresses (RFC 1918, RFC 6598 shared space, RFC 4193 ULA)
    Private,
    /// Link-local addresses (169.254.0.0/16, fe80::/10)
    LinkLocal,
    /// Special-purpose ranges that are never globally routable: multicast,
    /// reserved, documentation and benchmarking space.
    Reserved,
    /// Public/global addresses (everything else)
    Public,
}

/// Extract the IP address from a multiaddr.
///
/// Returns `None` if the multiaddr doesn't contain an IP protocol.
pub fn extract_ip(addr: &Multiaddr) -> Option<IpAddr> {
    addr.iter().find_map(|proto| match proto {
        Protocol::Ip4(ip) => Some(IpAddr::V4(ip)),
        Protocol::Ip6(ip) => Some(IpAddr::V6(ip)),
        _ => None,
    })
}

/// Classify the scope of an IP address.
///
/// Returns `None` for unspecified and broadcast addresses, which are never routable.
pub fn classify_ip(ip: IpAddr) -> Option<AddressScope> {
    match ip {
        IpAddr::V4(ipv4) => classify_ipv4(ipv4),
        IpAddr::V6(ipv6) => match ipv6.to_ipv4_mapped() {
            Some(mapped) => classify_ipv4(mapped),
            None => classify_ipv6(ipv6),
        },
    }
}

fn classify_ipv4(ip: Ipv4Addr) -> Option<AddressScope> {
    if ip.is_unspecified() || ip.is_broadcast() {
        None
    } else if ip.is_loopback() {
        Some(AddressScope::Loopback)
    } else if ip.is_private() || is_shared_ipv4(ip) {
        Some(AddressScope::Private)
    } else if ip.is_link_local() {
        Some(AddressScope::LinkLocal)
    } else if is_reserved_ipv4(ip) {
        Some(AddressScope::Reserved)
    } else {
        Some(AddressScope::Public)
    }
}

/// Non-routable special-purpose IPv4 blocks (RFC 6890).
fn is_reserved_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    match (a, b, c) {
        // this network
        (0, _, _) => true,
        // IETF protocol assignments
        (192, 0, 0) => true,
        // TEST-NET-1, TEST-NET-2, TEST-NET-3
        (192, 0, 2) | (198, 51, 100) | (203, 0, 113) => true,
        // benchmarking, 198.18.0.0/15
        (198, 18 | 19, _) => true,
        // multicast 224/4 and reserved 240/4
        _ => ip.is_multicast() || a >= 240,
    }
}

/// RFC 6598 carrier-grade NAT space (100.64.0.0/10).
fn is_shared_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 100 && (b & 0b1100_0000) == 0b0100_0000
}

fn classify_ipv6(ip: Ipv6Addr) -> Option<AddressScope> {
    if ip.is_unspecified() {
        None
    } else if ip.is_loopback() {
        Some(AddressScope::Loopback)
    } else if ip.is_unique_local() {
        // fc00::/7
        Some(AddressScope::Private)
    } else if ip.is_unicast_link_local() {
        // fe80::/10
        Some(AddressScope::LinkLocal)
    } else if is_reserved_ipv6(ip) {
        Some(AddressScope::Reserved)
    } else {
        Some(AddressScope::Public)
    }
}

/// Multicast (ff00::/8), documentation (2001:db8::/32) and discard-only
/// (100::/64) IPv6 space.
fn is_reserved_ipv6(ip: Ipv6Addr) -> bool {
    let [s0, s1, s2, s3, ..] = ip.segments();
    ip.is_multicast() || (s0, s1) == (0x2001, 0x0db8) || (s0, s1, s2, s3) == (0x0100, 0, 0, 0)
}

/// Classify the scope of the IP in a multiaddr.
///
/// Returns `None` if the multiaddr doesn't contain an IP address or if the
/// IP is unspecified.
pub fn classify_multiaddr(addr: &Multiaddr) -> Option<AddressScope> {
    extract_ip(addr).and_then(classify_ip)
}

/// Whether a multiaddr is reachable from the public internet.
///
/// IP addresses must classify as [`AddressScope::Public`]. DNS addresses are
/// public unless they name a special-use domain (`localhost`, `.local`).
pub fn is_public_multiaddr(addr: &Multiaddr) -> bool {
    if let Some(ip) = extract_ip(addr) {
        return classify_ip(ip) == Some(AddressScope::Public);
    }

    addr.iter()
        .find_map(|proto| match proto {
            Protocol::Dns(name)
            | Protocol::Dns4(name)
            | Protocol::Dns6(name)
            | Protocol::Dnsaddr(name) => Some(is_public_domain(&name)),
            _ => None,
        })
        .unwrap_or(false)
}

fn is_public_domain(name: &str) -> bool {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    !(name == "localhost"
        || name.ends_with(".localhost")
        || name == "local"
        || name.ends_with(".local"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_classify_ipv4_loopback() {
        assert_eq!(
            classify_multiaddr(&addr("/ip4/127.0.0.1/tcp/4001")),
            Some(AddressScope::Loopback)
        );
        assert_eq!(
            classify_multiaddr(&addr("/ip4/127.255.255.255/tcp/4001")),
            Some(AddressScope::Loopback)
        );
    }

    #[test]
    fn test_classify_ipv4_private() {
        for s in [
            "/ip4/10.0.0.1/tcp/4001",
            "/ip4/172.16.0.1/tcp/4001",
            "/ip4/172.31.255.255/tcp/4001",
            "/ip4/192.168.1.1/tcp/4001",
            "/ip4/100.64.0.1/tcp/4001",
            "/ip4/100.127.255.255/tcp/4001",
        ] {
            assert_eq!(classify_multiaddr(&addr(s)), Some(AddressScope::Private), "{s}");
        }
    }

    #[test]
    fn test_classify_ipv4_link_local() {
        assert_eq!(
            classify_multiaddr(&addr("/ip4/169.254.0.1/tcp/4001")),
            Some(AddressScope::LinkLocal)
        );
    }

    #[test]
    fn test_classify_ipv4_public() {
        for s in [
            "/ip4/8.8.8.8/tcp/4001",
            "/ip4/172.15.255.255/tcp/4001",
            "/ip4/172.32.0.0/tcp/4001",
            "/ip4/100.128.0.1/tcp/4001",
        ] {
            assert_eq!(classify_multiaddr(&addr(s)), Some(AddressScope::Public), "{s}");
        }
    }

    #[test]
    fn test_classify_ipv4_reserved() {
        for s in [
            "/ip4/224.0.0.1/tcp/4001",
            "/ip4/239.255.255.250/udp/1900",
            "/ip4/240.0.0.1/tcp/4001",
            "/ip4/0.1.2.3/tcp/4001",
            "/ip4/192.0.0.8/tcp/4001",
            "/ip4/192.0.2.1/tcp/4001",
            "/ip4/198.51.100.1/tcp/4001",
            "/ip4/203.0.113.7/tcp/4001",
            "/ip4/198.18.0.1/tcp/4001",
            "/ip4/198.19.255.254/tcp/4001",
        ] {
            assert_eq!(classify_multiaddr(&addr(s)), Some(AddressScope::Reserved), "{s}");
            assert!(!is_public_multiaddr(&addr(s)), "{s}");
        }
        assert_eq!(
            classify_multiaddr(&addr("/ip4/198.20.0.1/tcp/4001")),
            Some(AddressScope::Public)
        );
    }

    #[test]
    fn test_classify_ipv6_reserved() {
        for s in [
            "/ip6/ff02::1/tcp/4001",
            "/ip6/ff05::2/tcp/4001",
            "/ip6/2001:db8::1/tcp/4001",
            "/ip6/100::1/tcp/4001",
        ] {
            assert_eq!(classify_multiaddr(&addr(s)), Some(AddressScope::Reserved), "{s}");
            assert!(!is_public_multiaddr(&addr(s)), "{s}");
        }
        assert!(is_public_multiaddr(&addr("/ip6/2001:4860:4860::8888/tcp/4001")));
    }

    #[test]
    fn test_classify_ipv6() {
        assert_eq!(
            classify_multiaddr(&addr("/ip6/::1/tcp/4001")),
            Some(AddressScope::Loopback)
        );
        assert_eq!(
            classify_multiaddr(&addr("/ip6/fd00::1/tcp/4001")),
            Some(AddressScope::Private)
        );
        assert_eq!(
            classify_multiaddr(&addr("/ip6/fe80::1/tcp/4001")),
            Some(AddressScope::LinkLocal)
        );
        assert_eq!(
            classify_multiaddr(&addr("/ip6/2607:f8b0:4004:800::200e/tcp/4001")),
            Some(AddressScope::Public)
        );
    }

    #[test]
    fn test_ipv4_mapped_ipv6_uses_ipv4_rules() {
        assert_eq!(
            classify_multiaddr(&addr("/ip6/::ffff:192.168.1.1/tcp/4001")),
            Some(AddressScope::Private)
        );
    }

    #[test]
    fn test_unspecified_is_unclassified() {
        assert_eq!(classify_multiaddr(&addr("/ip4/0.0.0.0/tcp/4001")), None);
        assert_eq!(classify_multiaddr(&addr("/ip6/::/tcp/4001")), None);
        assert!(!is_public_multiaddr(&addr("/ip4/0.0.0.0/tcp/4001")));
    }

    #[test]
    fn test_dns_publicity() {
        assert!(is_public_multiaddr(&addr("/dns4/relay.example.com/tcp/4001")));
        assert!(!is_public_multiaddr(&addr("/dns4/localhost/tcp/4001")));
        assert!(!is_public_multiaddr(&addr("/dns6/printer.local/tcp/4001")));
    }

    #[test]
    fn test_non_ip_non_dns_is_not_public() {
        assert!(!is_public_multiaddr(&addr("/memory/1234")));
    }
}
