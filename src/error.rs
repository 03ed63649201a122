//! Crate-wide error taxonomy (§7 of the design doc).
//!
//! Transient socket conditions (`WouldBlock`/`EINPROGRESS`) are deliberately
//! not errors here — they surface as [`crate::engine::connection::IoStep::Incomplete`]
//! so the finite-state machine never inspects `errno` directly.

use std::io;

use crate::address::ParsePeerIdError;
use crate::wire::WireError;

/// Errors fatal at process start: bad CLI input, unusable bind addresses,
/// an unopenable log or restore file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one of -4 or -6 must be given")]
    NoBindAddress,
    #[error("invalid peer identifier in {flag}: {source}")]
    InvalidPeer {
        flag: &'static str,
        #[source]
        source: ParsePeerIdError,
    },
    #[error("failed to open log file {path:?}: {source}")]
    LogFile {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read restore file {path:?}: {source}")]
    RestoreFile {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors that end a single peer connection. These never propagate past
/// the engine: every variant is logged and converted into a cleanup.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("connection timed out ({0})")]
    Timeout(&'static str),
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("peer closed the connection")]
    Closed,
}

/// Errors from the dispatcher that are not specific to any one peer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no sockets available")]
    OutOfSockets,
    #[error("no local bind address configured for address family of {0}")]
    NoMatchingBindAddress(std::net::IpAddr),
    #[error("socket setup failed: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error returned by [`crate::run`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
