//! Peer identifiers and the address validator.
//!
//! Grounded in the original engine's `is_valid_ip`/`is_valid_port` and
//! `parse_netaddr`/`make_netaddr_version`: canonical peer identity is the
//! string `"[ip]:port"`, and a fixed prefix blocklist keeps the crawler off
//! private, loopback, link-local, and multicast space.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// A peer's network identity: an IP address and a port.
///
/// Equality and hashing are defined on the canonical `"[ip]:port"` string,
/// matching the original engine's use of that string as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    addr: IpAddr,
    port: u16,
}

impl PeerId {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl From<SocketAddr> for PeerId {
    fn from(sa: SocketAddr) -> Self {
        Self {
            addr: sa.ip(),
            port: sa.port(),
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:{}", self.addr, self.port)
    }
}

/// Error returned when a `"[ip]:port"` string fails to parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid peer identifier: {0:?}")]
pub struct ParsePeerIdError(String);

impl FromStr for PeerId {
    type Err = ParsePeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .strip_prefix('[')
            .and_then(|rest| rest.split_once("]:"))
            .ok_or_else(|| ParsePeerIdError(s.to_string()))?;
        let (ip_str, port_str) = inner;
        let addr: IpAddr = ip_str
            .parse()
            .map_err(|_| ParsePeerIdError(s.to_string()))?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| ParsePeerIdError(s.to_string()))?;
        Ok(PeerId { addr, port })
    }
}

/// Returns `true` iff `addr` is suitable to crawl: not RFC1918, loopback,
/// link-local, multicast, or mixed-notation, and not the unspecified
/// address.
fn is_valid_ip(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_valid_ipv4(v4),
        IpAddr::V6(v6) => is_valid_ipv6(v6),
    }
}

fn is_valid_ipv4(v4: &Ipv4Addr) -> bool {
    if v4.is_private() || v4.is_loopback() || v4.is_link_local() {
        return false;
    }
    if v4.is_unspecified() {
        return false;
    }
    let [a, b, c, _] = v4.octets();
    // Only the literal 224.0.0.0/24 prefix is blocked, matching the
    // original's `strstr(ip, "224.0.0.") == ip`; the rest of 224.0.0.0/4
    // (e.g. 225.x, 239.x) is left crawlable.
    if a == 224 && b == 0 && c == 0 {
        return false;
    }
    // 172.16.0.0/12 isn't covered by Ipv4Addr::is_private on all octets;
    // std's is_private already spans 172.16.0.0/12, kept here for clarity
    // with the original's explicit 172.16.-172.31. range.
    if a == 172 && (16..=31).contains(&b) {
        return false;
    }
    true
}

fn is_valid_ipv6(v6: &Ipv6Addr) -> bool {
    if v6.is_loopback() || v6.is_unspecified() || v6.is_multicast() {
        return false;
    }
    let segments = v6.segments();
    // fc00::/7 (unique local) covers fc00: and fd00:.
    if (segments[0] & 0xfe00) == 0xfc00 {
        return false;
    }
    // fe80::/10, link-local.
    if (segments[0] & 0xffc0) == 0xfe80 {
        return false;
    }
    // Any address that still carries IPv4-mapped notation at this point is
    // malformed input: callers are expected to have already demapped
    // `::ffff:a.b.c.d` into a plain IPv4 address before validation.
    if v6.to_ipv4_mapped().is_some() {
        return false;
    }
    true
}

fn is_valid_port(port: u16) -> bool {
    port > 1024
}

/// Validate a candidate peer for crawling.
pub fn is_valid_peer(peer: &PeerId) -> bool {
    is_valid_ip(&peer.addr) && is_valid_port(peer.port)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(ip: &str, port: u16) -> PeerId {
        PeerId::new(ip.parse().unwrap(), port)
    }

    #[test]
    fn peer_id_display_and_parse_round_trip() {
        let p = peer("203.0.113.7", 8333);
        let s = p.to_string();
        assert_eq!(s, "[203.0.113.7]:8333");
        assert_eq!(s.parse::<PeerId>().unwrap(), p);
    }

    #[test]
    fn rejects_rfc1918_and_loopback() {
        assert!(!is_valid_peer(&peer("10.0.0.1", 8333)));
        assert!(!is_valid_peer(&peer("192.168.1.1", 8333)));
        assert!(!is_valid_peer(&peer("172.16.0.5", 8333)));
        assert!(!is_valid_peer(&peer("172.31.255.255", 8333)));
        assert!(!is_valid_peer(&peer("127.0.0.1", 8333)));
    }

    #[test]
    fn rejects_multicast_and_link_local() {
        assert!(!is_valid_peer(&peer("224.0.0.1", 8333)));
        assert!(!is_valid_peer(&peer("fe80::1", 8333)));
        assert!(!is_valid_peer(&peer("fc00::1", 8333)));
        assert!(!is_valid_peer(&peer("fd00::1", 8333)));
    }

    #[test]
    fn only_the_literal_224_0_0_prefix_is_blocked() {
        // 224.0.0.0/24 is blocked, matching the original's literal
        // "224.0.0." prefix check.
        assert!(!is_valid_peer(&peer("224.0.0.255", 8333)));
        // The rest of 224.0.0.0/4 is ordinary multicast space the original
        // never filters and is left crawlable here too.
        assert!(is_valid_peer(&peer("224.0.1.1", 8333)));
        assert!(is_valid_peer(&peer("225.1.2.3", 8333)));
        assert!(is_valid_peer(&peer("239.1.1.1", 8333)));
    }

    #[test]
    fn rejects_unspecified_and_low_port() {
        assert!(!is_valid_peer(&peer("::", 8333)));
        assert!(!is_valid_peer(&peer("203.0.113.7", 1024)));
    }

    #[test]
    fn accepts_global_unicast_with_high_port() {
        assert!(is_valid_peer(&peer("203.0.113.7", 8333)));
        assert!(is_valid_peer(&peer("2001:db8::1", 8333)));
    }
}
