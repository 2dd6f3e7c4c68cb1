use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed and the result is sorted.
pub fn detect_local_networks() -> Result<Vec<Ipv4Net>> {
    let mut set = BTreeSet::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(v4.ip));
        }
    }
    Ok(set.into_iter().collect())
}

/// Render the host portion of a network as an address range segment.
///
/// Excludes the network and broadcast addresses; `None` for /31 and /32.
pub fn host_range_segment(net: Ipv4Net) -> Option<String> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if end <= start + 1 {
        return None;
    }
    Some(format!(
        "{}-{}",
        Ipv4Addr::from(start + 1),
        Ipv4Addr::from(end - 1)
    ))
}

/// Build an address specification covering every detected local /24.
pub fn local_address_spec() -> Result<Option<String>> {
    let segments: Vec<String> = detect_local_networks()?
        .into_iter()
        .filter_map(host_range_segment)
        .collect();
    Ok((!segments.is_empty()).then(|| segments.join(",")))
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::new(ip, 24)
        .map(|n| n.trunc())
        .unwrap_or_else(|_| Ipv4Net::from(ip))
}
