//! Message framing, checksums, and the handful of message builders/parsers
//! this crawler needs: `version`, `verack`, `getaddr`, `addr`, `ping`/`pong`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use super::codec::{decode_valint, decode_valstring, encode_valstring};
use super::constants::{
    ADDR_TIME_VERSION, COMMAND_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE, NODE_NETWORK, NODE_WITNESS,
    PROTOCOL_VERSION,
};
use crate::address::PeerId;

/// Errors raised while framing or parsing a message. Every variant here is
/// a peer-level protocol violation: the caller turns it into a connection
/// cleanup without reconnect, never a fatal error.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("header too short")]
    ShortHeader,
    #[error("magic mismatch: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },
    #[error("payload length {0} exceeds the maximum of {MAX_PAYLOAD_SIZE:#x}")]
    PayloadTooLarge(usize),
    #[error("message body is truncated")]
    Truncated,
    #[error("malformed variable-length field")]
    BadVarint,
    #[error("address record count {0} would overrun the declared payload")]
    AddrCountOverrun(u64),
}

/// A parsed 24-byte message header.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub magic: u32,
    pub command: [u8; COMMAND_SIZE],
    pub payload_len: u32,
    pub checksum: [u8; 4],
}

impl Header {
    /// Command as a `&str`, trimmed of trailing NUL padding.
    pub fn command_str(&self) -> &str {
        let end = self
            .command
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_SIZE);
        std::str::from_utf8(&self.command[..end]).unwrap_or("")
    }
}

/// Parse a header from the front of `buf` and validate it against
/// `expected_magic`. Does not consume `buf`; the caller slices separately.
pub fn parse_header(buf: &[u8], expected_magic: u32) -> Result<Header, WireError> {
    if buf.len() < HEADER_SIZE {
        return Err(WireError::ShortHeader);
    }
    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if magic != expected_magic {
        return Err(WireError::BadMagic {
            expected: expected_magic,
            got: magic,
        });
    }
    let mut command = [0u8; COMMAND_SIZE];
    command.copy_from_slice(&buf[4..16]);
    // The last command byte is always treated as the NUL terminator,
    // matching the original engine's defensive zeroing before compare.
    command[COMMAND_SIZE - 1] = 0;
    let payload_len = u32::from_le_bytes(buf[16..20].try_into().unwrap());
    if payload_len as usize > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge(payload_len as usize));
    }
    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&buf[20..24]);
    Ok(Header {
        magic,
        command,
        payload_len,
        checksum,
    })
}

/// First 4 bytes of `SHA256(SHA256(payload))`.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let once = Sha256::digest(payload);
    let twice = Sha256::digest(once);
    let mut out = [0u8; 4];
    out.copy_from_slice(&twice[0..4]);
    out
}

/// Frame `payload` under `command` with a freshly computed checksum.
fn build_message(magic: u32, command: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&magic.to_le_bytes());
    let mut cmd_bytes = [0u8; COMMAND_SIZE];
    let bytes = command.as_bytes();
    cmd_bytes[..bytes.len()].copy_from_slice(bytes);
    out.extend_from_slice(&cmd_bytes);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum(payload));
    out.extend_from_slice(payload);
    out
}

/// Encode an IP address as a 16-byte IPv6 field, mapping IPv4 addresses
/// into `::ffff:a.b.c.d` as the wire format requires.
fn encode_addr_ip(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn decode_addr_ip(bytes: &[u8; 16]) -> IpAddr {
    let v6 = Ipv6Addr::from(*bytes);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

/// Encode a version-style net_addr record (26 bytes: no leading `time`):
/// 8B services, 16B address, 2B port (big-endian).
fn encode_net_addr_version(peer: &PeerId) -> [u8; 26] {
    let mut out = [0u8; 26];
    out[0..8].copy_from_slice(&(NODE_NETWORK | NODE_WITNESS).to_le_bytes());
    out[8..24].copy_from_slice(&encode_addr_ip(peer.addr()));
    out[24..26].copy_from_slice(&peer.port().to_be_bytes());
    out
}

/// Build a `version` payload addressed to `peer`.
pub fn make_version(magic: u32, peer: &PeerId) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    payload.extend_from_slice(&(NODE_NETWORK | NODE_WITNESS).to_le_bytes());
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(&encode_net_addr_version(peer));
    // addr_from: zeroed, we don't claim a reachable address of our own.
    payload.extend_from_slice(&[0u8; 26]);
    payload.extend_from_slice(&0u64.to_le_bytes()); // nonce
    payload.extend_from_slice(&encode_valstring(b"")); // user agent
    payload.extend_from_slice(&0i32.to_le_bytes()); // start_height
    if PROTOCOL_VERSION >= 70001 {
        payload.push(0); // relay = false
    }
    build_message(magic, "version", &payload)
}

/// Build an empty `verack` message.
pub fn make_verack(magic: u32) -> Vec<u8> {
    build_message(magic, "verack", &[])
}

/// Build an empty `getaddr` message.
pub fn make_getaddr(magic: u32) -> Vec<u8> {
    build_message(magic, "getaddr", &[])
}

/// Build a `pong` message echoing the 8-byte nonce from a received `ping`.
pub fn make_pong(magic: u32, nonce: [u8; 8]) -> Vec<u8> {
    build_message(magic, "pong", &nonce)
}

/// Parse the first 4 bytes of a `version` payload: the peer's protocol
/// version.
pub fn parse_version_payload(payload: &[u8]) -> Result<i32, WireError> {
    let bytes: [u8; 4] = payload.get(0..4).ok_or(WireError::Truncated)?.try_into().unwrap();
    Ok(i32::from_le_bytes(bytes))
}

/// Parse an 8-byte `ping` nonce, to be echoed back in `pong`.
pub fn parse_ping_payload(payload: &[u8]) -> Result<[u8; 8], WireError> {
    payload
        .get(0..8)
        .ok_or(WireError::Truncated)?
        .try_into()
        .map_err(|_| WireError::Truncated)
}

/// Record size of an address entry depends on the peer's advertised
/// protocol version: 30 bytes (with leading 4-byte `time`) from
/// [`ADDR_TIME_VERSION`] onward, 26 bytes before that.
fn addr_record_size(peer_version: i32) -> usize {
    if peer_version >= ADDR_TIME_VERSION {
        30
    } else {
        26
    }
}

/// Parse an `addr` payload into the list of peers it discloses. Addresses
/// are returned unfiltered; callers apply [`crate::address::is_valid_peer`].
pub fn parse_addr(payload: &[u8], peer_version: i32) -> Result<Vec<PeerId>, WireError> {
    let count = decode_valint(payload).ok_or(WireError::BadVarint)?;
    let record_size = addr_record_size(peer_version);
    let needed = count
        .value
        .checked_mul(record_size as u64)
        .and_then(|n| n.checked_add(count.consumed as u64))
        .ok_or(WireError::AddrCountOverrun(count.value))?;
    if needed > payload.len() as u64 {
        return Err(WireError::AddrCountOverrun(count.value));
    }
    let has_time = record_size == 30;
    let mut out = Vec::with_capacity(count.value as usize);
    let mut offset = count.consumed;
    for _ in 0..count.value {
        let record = &payload[offset..offset + record_size];
        let record = if has_time { &record[4..] } else { record };
        let ip_bytes: [u8; 16] = record[8..24].try_into().unwrap();
        let addr = decode_addr_ip(&ip_bytes);
        let port = u16::from_be_bytes(record[24..26].try_into().unwrap());
        out.push(PeerId::new(addr, port));
        offset += record_size;
    }
    Ok(out)
}

/// Decode a `valstring`-prefixed field such as the `version` message's
/// user-agent, returning the string and bytes consumed. Exposed for tests
/// and for any future message that carries one; the crawler's own builders
/// only ever emit an empty user agent.
#[cfg(test)]
fn decode_user_agent(buf: &[u8]) -> Option<(&[u8], usize)> {
    decode_valstring(buf)
}
