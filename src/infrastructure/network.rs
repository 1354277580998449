//! Local network helpers.

use std::net::{IpAddr, Ipv4Addr};

/// First non-loopback IPv4 address of this host.
#[must_use]
pub fn local_ipv4() -> Option<Ipv4Addr> {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(ip)) if !ip.is_loopback() => Some(ip),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Could not determine local IP: {}", e);
            None
        }
    }
}

/// Local address, or loopback when there is no LAN interface.
#[must_use]
pub fn local_ip_or_loopback() -> IpAddr {
    local_ipv4().map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V4)
}

/// Every host address of the /24 containing `ip`.
#[must_use]
pub fn subnet_hosts(ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = ip.octets();
    (1..=254).map(|d| Ipv4Addr::new(a, b, c, d)).collect()
}
