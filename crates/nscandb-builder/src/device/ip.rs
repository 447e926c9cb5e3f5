//! IPv4 address checks used while attaching addresses and routes.

use std::net::Ipv4Addr;

/// Addresses that never identify a device: `127.0.0.0/8`, `0.0.0.0/8`, and
/// with a prefix, the multicast and limited-broadcast routes.
pub fn is_bad_device_ip(ip: &str, prefix: Option<u32>) -> bool {
    if ip.starts_with("127.") || ip.starts_with("0.") {
        return true;
    }
    matches!(
        (ip, prefix),
        ("224.0.0.0", Some(4)) | ("239.0.0.0", Some(8)) | ("255.255.255.255", Some(32))
    )
}

/// Prefix length of a dotted netmask; no mask means a host route. An octet
/// that is not a contiguous mask makes the whole mask a host mask.
pub fn network_prefix(mask: Option<&str>) -> u32 {
    let Some(mask) = mask else {
        return 32;
    };
    let mut prefix = 0;
    for octet in mask.split('.') {
        prefix += match octet {
            "255" => 8,
            "254" => 7,
            "252" => 6,
            "248" => 5,
            "240" => 4,
            "224" => 3,
            "192" => 2,
            "128" => 1,
            "0" => 0,
            _ => return 32,
        };
    }
    prefix
}

/// Broadcast address of `ip/prefix`.
pub fn broadcast_ip(ip: &str, prefix: u32) -> Option<String> {
    let addr: Ipv4Addr = ip.parse().ok()?;
    let host_bits = if prefix >= 32 {
        0
    } else {
        u32::MAX >> prefix
    };
    Some(Ipv4Addr::from(u32::from(addr) | host_bits).to_string())
}

/// Address part of `a.b.c.d/len`.
pub fn strip_prefix_len(ip: &str) -> &str {
    ip.split_once('/').map_or(ip, |(addr, _)| addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_device_ips() {
        assert!(is_bad_device_ip("127.0.0.1", None));
        assert!(!is_bad_device_ip("10.0.0.1", None));
        assert!(is_bad_device_ip("0.1.2.3", None));
        assert!(is_bad_device_ip("224.0.0.0", Some(4)));
        assert!(!is_bad_device_ip("224.0.0.0", None));
        assert!(!is_bad_device_ip("239.0.0.0", Some(9)));
        assert!(is_bad_device_ip("255.255.255.255", Some(32)));
    }

    #[test]
    fn netmask_prefix() {
        assert_eq!(network_prefix(None), 32);
        assert_eq!(network_prefix(Some("255.255.255.0")), 24);
        assert_eq!(network_prefix(Some("255.255.240.0")), 20);
        assert_eq!(network_prefix(Some("0.0.0.0")), 0);
        assert_eq!(network_prefix(Some("255.3.0.0")), 32);
    }

    #[test]
    fn broadcast() {
        assert_eq!(broadcast_ip("10.1.2.3", 24).as_deref(), Some("10.1.2.255"));
        assert_eq!(broadcast_ip("10.1.2.3", 32).as_deref(), Some("10.1.2.3"));
        assert_eq!(broadcast_ip("10.1.2.3", 0).as_deref(), Some("255.255.255.255"));
        assert_eq!(broadcast_ip("172.16.5.9", 20).as_deref(), Some("172.16.15.255"));
        assert_eq!(broadcast_ip("not-an-ip", 24), None);
    }
}
