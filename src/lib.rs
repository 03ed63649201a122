//! A concurrent crawler for Bitcoin-family peer-to-peer networks.
//!
//! Starting from a set of seed peers, the crawler opens a TCP connection to
//! each, completes the minimum of the version handshake, asks for its known
//! neighbors, records what comes back, and enqueues newly discovered
//! addresses for the same treatment. The result is an append-only file
//! listing, per contacted peer, the neighbor set it disclosed.
//!
//! The crate is organized leaf-first, matching the dependency order of the
//! crawl itself: [`wire`] (byte codec, framing, message builders/parsers),
//! [`address`] (peer identity and the address validator), [`filter`] (the
//! per-connection address-learning collector), and [`engine`] (the
//! connection FSM and the poll-driven reactor that ties it all together).

pub mod address;
pub mod config;
pub mod dump;
pub mod engine;
pub mod error;
pub mod filter;
pub mod logger;
pub mod wire;

pub use config::Config;
pub use error::Error;

/// Build and run a fully wired engine from a validated configuration.
pub fn run(config: Config) -> Result<(), Error> {
    engine::run(config)
}
