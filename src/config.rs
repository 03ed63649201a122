//! CLI parsing and the resulting [`Config`] value handed to the engine.
//!
//! Grounded in the original engine's `main.cc` getopt handling (flags
//! `-4 -6 -p -s -r -d -l`) and, for the Rust argument-parsing idiom itself,
//! the teacher's `wallet` binary, which parses its CLI with `argh`.
//!
//! The original's usage text advertises `-l <logfile>` but its getopt
//! string omits `l`, so the flag is silently dead in the original. This
//! implementation honors the documented behavior: `-l` works.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;

use argh::FromArgs;

use crate::address::PeerId;
use crate::error::ConfigError;
use crate::wire::Network;

/// Raw command-line surface.
#[derive(FromArgs, Debug)]
/// Crawl a Bitcoin-family peer-to-peer network, recording the neighbor
/// sets that reachable peers disclose.
pub struct Cli {
    /// local IPv4 address to bind from
    #[argh(option, short = '4')]
    pub bind_v4: Option<Ipv4Addr>,

    /// local IPv6 address to bind from
    #[argh(option, short = '6')]
    pub bind_v6: Option<Ipv6Addr>,

    /// local port to bind to, applied to whichever of -4/-6 is given
    #[argh(option, short = 'p', default = "0")]
    pub port: u16,

    /// seed peer as [ip]:port; may be repeated
    #[argh(option, short = 's')]
    pub seeds: Vec<String>,

    /// restore file to pre-populate handled/learned state from
    #[argh(option, short = 'r')]
    pub restore_file: Option<PathBuf>,

    /// dump file to append discovered neighbors to
    #[argh(option, short = 'd', default = "PathBuf::from(\"nodemap.txt\")")]
    pub dump_file: PathBuf,

    /// log file to append activity to
    #[argh(option, short = 'l', default = "PathBuf::from(\"btclog.txt\")")]
    pub log_file: PathBuf,

    /// network to target: main, testnet, testnet3, namecoin
    #[argh(option, short = 'n', default = "Network::Testnet3")]
    pub network: Network,
}

/// Fully validated configuration handed to the engine.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_v4: Option<SocketAddrV4>,
    pub bind_v6: Option<SocketAddrV6>,
    pub seeds: Vec<PeerId>,
    pub restore_file: Option<PathBuf>,
    pub dump_file: PathBuf,
    pub log_file: PathBuf,
    pub network: Network,
    pub reconnects: u32,
    pub max_connects_per_tick: usize,
    /// Whether a fixed local port was configured, which lengthens the
    /// reconnect cool-down to the TCP FIN_WAIT grace period (§4.7).
    pub fixed_local_port: bool,
}

impl Config {
    /// Validate and lower [`Cli`] into a [`Config`].
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.bind_v4.is_none() && cli.bind_v6.is_none() {
            return Err(ConfigError::NoBindAddress);
        }

        let mut seeds = Vec::with_capacity(cli.seeds.len());
        for raw in &cli.seeds {
            let peer = raw
                .parse::<PeerId>()
                .map_err(|source| ConfigError::InvalidPeer { flag: "-s", source })?;
            seeds.push(peer);
        }

        Ok(Config {
            bind_v4: cli.bind_v4.map(|ip| SocketAddrV4::new(ip, cli.port)),
            bind_v6: cli.bind_v6.map(|ip| SocketAddrV6::new(ip, cli.port, 0, 0)),
            seeds,
            restore_file: cli.restore_file,
            dump_file: cli.dump_file,
            log_file: cli.log_file,
            network: cli.network,
            reconnects: crate::wire::constants::RECONNECTS,
            max_connects_per_tick: crate::wire::constants::MAX_CONNECTS_PER_TICK,
            fixed_local_port: cli.port != 0,
        })
    }

    /// The local bind address matching `addr`'s family, if configured.
    pub fn bind_for(&self, addr: &std::net::IpAddr) -> Option<SocketAddr> {
        match addr {
            std::net::IpAddr::V4(_) => self.bind_v4.map(SocketAddr::V4),
            std::net::IpAddr::V6(_) => self.bind_v6.map(SocketAddr::V6),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            bind_v4: Some(Ipv4Addr::UNSPECIFIED),
            bind_v6: None,
            port: 0,
            seeds: Vec::new(),
            restore_file: None,
            dump_file: PathBuf::from("nodemap.txt"),
            log_file: PathBuf::from("btclog.txt"),
            network: Network::Testnet3,
        }
    }

    #[test]
    fn requires_at_least_one_bind_address() {
        let mut cli = base_cli();
        cli.bind_v4 = None;
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::NoBindAddress)
        ));
    }

    #[test]
    fn parses_seed_peers() {
        let mut cli = base_cli();
        cli.seeds.push("[203.0.113.1]:8333".to_string());
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.seeds.len(), 1);
    }

    #[test]
    fn rejects_malformed_seed_peer() {
        let mut cli = base_cli();
        cli.seeds.push("not-a-peer".to_string());
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::InvalidPeer { .. })
        ));
    }
}
