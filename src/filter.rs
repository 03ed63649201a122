//! Per-connection address collection.
//!
//! The original engine expressed this as a small virtual-dispatch
//! hierarchy (`filter` base class, `debug_filter`/`addr_filter`
//! subclasses) holding a non-owning pointer back to the whole engine. Here
//! the hierarchy becomes a trait object, and the back-reference is
//! narrowed to [`NodeSink`]: the only capability a filter actually needs is
//! "tell me if you already know this peer" and "learn this new one".

use std::collections::HashSet;

use crate::address::PeerId;

/// The subset of engine state a filter needs, exposed without granting it
/// ownership or a full view of the engine.
pub trait NodeSink {
    /// True if `peer` is already handled or already queued to be learned.
    fn is_known(&self, peer: &PeerId) -> bool;
    /// Queue `peer` for a future connection attempt.
    fn learn(&mut self, peer: PeerId);
}

/// A per-connection collector driven by every inbound message.
pub trait Filter {
    /// Inspect one inbound message. `command` is the message's command
    /// string; `payload` is its undecoded body. Only `addr` payloads do
    /// anything; everything else is ignored here (the connection's own FSM
    /// handles protocol replies).
    fn collect(
        &mut self,
        source: PeerId,
        peer_version: i32,
        command: &str,
        payload: &[u8],
        sink: &mut dyn NodeSink,
    );

    /// Flush whatever this filter has accumulated, as lines appended to the
    /// dump file (see [`crate::dump`]).
    fn dump(&self) -> Vec<String>;
}

/// The filter actually used in production: learns and records neighbors
/// disclosed via `addr`.
#[derive(Debug, Default)]
pub struct AddrFilter {
    /// Neighbors disclosed, keyed by the peer that disclosed them.
    neighbors: std::collections::HashMap<PeerId, HashSet<PeerId>>,
}

impl Filter for AddrFilter {
    fn collect(
        &mut self,
        source: PeerId,
        peer_version: i32,
        command: &str,
        payload: &[u8],
        sink: &mut dyn NodeSink,
    ) {
        if command != "addr" {
            return;
        }
        let parsed = match crate::wire::message::parse_addr(payload, peer_version) {
            Ok(peers) => peers,
            Err(err) => {
                log::debug!(target: "filter", "discarding malformed addr from {source}: {err}");
                return;
            }
        };
        let entry = self.neighbors.entry(source).or_default();
        for peer in parsed {
            if !crate::address::is_valid_peer(&peer) {
                continue;
            }
            if !sink.is_known(&peer) {
                sink.learn(peer);
            }
            entry.insert(peer);
        }
    }

    fn dump(&self) -> Vec<String> {
        self.neighbors
            .iter()
            .map(|(source, neighbors)| {
                let mut line = format!("{source},");
                for (i, n) in neighbors.iter().enumerate() {
                    if i > 0 {
                        line.push(',');
                    }
                    line.push_str(&n.to_string());
                }
                line
            })
            .collect()
    }
}

/// A diagnostic filter used in tests: logs every message it sees and keeps
/// nothing.
#[derive(Debug, Default)]
pub struct DebugFilter;

impl Filter for DebugFilter {
    fn collect(
        &mut self,
        source: PeerId,
        _peer_version: i32,
        command: &str,
        payload: &[u8],
        _sink: &mut dyn NodeSink,
    ) {
        log::debug!(target: "filter", "{source}: {command} ({} bytes)", payload.len());
    }

    fn dump(&self) -> Vec<String> {
        Vec::new()
    }
}
