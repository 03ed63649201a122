//! Network magics and protocol-level size limits.

/// Bitcoin-family network a crawl run targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Network {
    /// Bitcoin mainnet.
    Main,
    /// Original Bitcoin testnet.
    Testnet,
    /// Testnet3, the long-lived test network. Default target.
    Testnet3,
    /// Namecoin, which shares the Bitcoin wire format.
    Namecoin,
}

impl Default for Network {
    fn default() -> Self {
        Network::Testnet3
    }
}

impl Network {
    /// 4-byte magic that prefixes every message header on this network.
    pub fn magic(&self) -> u32 {
        match self {
            Network::Main => 0xD9B4_BEF9,
            Network::Testnet => 0xDAB5_BFFA,
            Network::Testnet3 => 0x0709_110B,
            Network::Namecoin => 0xFEB4_BEF9,
        }
    }

    /// Default listen/connect port for this network.
    pub fn port(&self) -> u16 {
        match self {
            Network::Main => 8333,
            Network::Testnet => 18333,
            Network::Testnet3 => 18333,
            Network::Namecoin => 8334,
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" | "mainnet" => Ok(Network::Main),
            "testnet" => Ok(Network::Testnet),
            "testnet3" => Ok(Network::Testnet3),
            "namecoin" => Ok(Network::Namecoin),
            other => Err(format!("unknown network {other:?}")),
        }
    }
}

/// Protocol version the crawler announces in its own `version` message.
pub const PROTOCOL_VERSION: i32 = 70015;

/// Protocol version at which peers gained the `time` field on address
/// records (see [`crate::wire::message::ADDR_RECORD_SIZE_WITH_TIME`]).
pub const ADDR_TIME_VERSION: i32 = 31402;

/// `NODE_NETWORK`, advertised in our `version` message.
pub const NODE_NETWORK: u64 = 1 << 0;
/// `NODE_WITNESS`, advertised in our `version` message.
pub const NODE_WITNESS: u64 = 1 << 3;

/// Header length: 4 (magic) + 12 (command) + 4 (paylen) + 4 (checksum).
pub const HEADER_SIZE: usize = 24;
/// Command field width inside the header.
pub const COMMAND_SIZE: usize = 12;

/// Largest payload length this crawler will accept or send.
pub const MAX_PAYLOAD_SIZE: usize = 0x10000;
/// Largest chunk written to a socket per `write_one` call.
pub const MAX_SEND_SIZE: usize = 0x1000;
/// Largest chunk read from a socket per `read_one` call.
pub const MAX_RX_SIZE: usize = 0x1000;
/// Attempts (first contact plus reconnects) allowed per peer before retirement.
pub const RECONNECTS: u32 = 7;
/// New connect attempts dispatched per outer loop iteration.
pub const MAX_CONNECTS_PER_TICK: usize = 256;
/// Sleep between successive dispatches within one reconnect pass.
pub const DISPATCH_SLEEP: std::time::Duration = std::time::Duration::from_millis(15);

/// Per-connection timeouts, in seconds.
pub mod timeouts {
    /// Time allowed for a non-blocking `connect()` to complete.
    pub const CONNECT: u64 = 30;
    /// Catch-all: no activity of any kind on the connection.
    pub const DEAD: u64 = 180;
    /// Time allowed to finish sending the staged outbound message.
    pub const TX_COMPLETE: u64 = DEAD;
    /// Time allowed to receive a complete framed message.
    pub const RX_COMPLETE: u64 = DEAD;
    /// Reconnect cool-down applied when the local port is fixed (TCP
    /// FIN_WAIT grace).
    pub const FIN_WAIT: u64 = 60;
    /// Reconnect cool-down applied when no fixed local port is configured.
    pub const SHORT_COOLDOWN: u64 = 2;
}
