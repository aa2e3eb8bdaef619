use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::LazyLock;

// Ranges std's stable Ipv4Addr/Ipv6Addr accessors do not cover:
// CGNAT (RFC 6598), IPv4 reserved, IPv6 link-local and unique-local.
static EXTENDED_PRIVATE: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    ["100.64.0.0/10", "240.0.0.0/4", "fe80::/10", "fc00::/7"]
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
});

/// Loopback or unspecified, gated by `allow_loopback_ips`.
pub fn is_loopback(ip: IpAddr) -> bool {
    ip.is_loopback() || ip.is_unspecified()
}

/// Broadcast, link-local, CGNAT, private, reserved, or unique-local,
/// gated by `allow_private_ips`.
pub fn is_private(ip: IpAddr) -> bool {
    let extended = EXTENDED_PRIVATE.iter().any(|net| net.contains(&ip));
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_link_local() || v4.is_broadcast() || extended
        }
        IpAddr::V6(_) => extended,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn loopback_and_unspecified() {
        assert!(is_loopback(v4(127, 0, 0, 1)));
        assert!(is_loopback(v4(127, 8, 8, 8)));
        assert!(is_loopback(v4(0, 0, 0, 0)));
        assert!(is_loopback(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_loopback(IpAddr::V6(Ipv6Addr::UNSPECIFIED)));
        assert!(!is_loopback(v4(8, 8, 8, 8)));
    }

    #[test]
    fn rfc1918_ranges_are_private() {
        assert!(is_private(v4(10, 1, 2, 3)));
        assert!(is_private(v4(172, 16, 0, 1)));
        assert!(is_private(v4(172, 31, 255, 255)));
        assert!(is_private(v4(192, 168, 1, 1)));
        assert!(!is_private(v4(172, 32, 0, 1)));
    }

    #[test]
    fn special_v4_ranges_are_private() {
        assert!(is_private(v4(169, 254, 0, 5)));
        assert!(is_private(v4(100, 64, 0, 1)));
        assert!(is_private(v4(100, 127, 255, 255)));
        assert!(is_private(v4(240, 0, 0, 1)));
        assert!(is_private(v4(255, 255, 255, 255)));
        assert!(!is_private(v4(100, 128, 0, 1)));
    }

    #[test]
    fn special_v6_ranges_are_private() {
        assert!(is_private("fe80::1".parse().unwrap()));
        assert!(is_private("fd00::1".parse().unwrap()));
        assert!(!is_private("2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn public_addresses_are_neither() {
        for ip in ["8.8.8.8", "93.184.216.34", "2606:2800:220:1::1"] {
            let ip: IpAddr = ip.parse().unwrap();
            assert!(!is_loopback(ip));
            assert!(!is_private(ip));
        }
    }
}
