//! The fd-indexed, `poll(2)`-driven crawl loop.
//!
//! Grounded in the original engine's `btc_scan` (`btc-map.h`/`btc-map.cc`):
//! `init()` becomes [`Reactor::new`] (raising the fd limit and
//! pre-allocating the connection table), `loop()` becomes
//! [`Reactor::run`]/[`Reactor::poll_tick`], and the reconnect half of
//! `loop()` becomes [`Reactor::dispatch_tick`]/[`Reactor::connect_peer`].

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::address::PeerId;
use crate::config::Config;
use crate::dump::{DumpWriter, Restored};
use crate::engine::connection::{IoStep, ParseOutcome, PeerConnection, State};
use crate::error::{DispatchError, Error, PeerError};
use crate::filter::NodeSink;
use crate::wire::constants::{timeouts, DISPATCH_SLEEP};
use crate::wire::message;

/// The fd-indexed poll loop that owns every peer connection.
pub struct Reactor {
    config: Config,
    magic: u32,
    handled: HashMap<PeerId, u32>,
    /// `None` means "never cooled down, dispatch on first opportunity";
    /// `Some(t)` means eligible once `t`'s cool-down has elapsed.
    learned: HashMap<PeerId, Option<Instant>>,
    connections: Vec<Option<PeerConnection>>,
    active_fds: BTreeSet<RawFd>,
    dump: DumpWriter,
}

impl Reactor {
    /// Raise the process fd limit, pre-allocate the connection table to
    /// it, and open the dump file for append.
    pub fn new(config: Config) -> Result<Self, Error> {
        raise_fd_limit()?;
        let limit = fd_limit()?;
        let magic = config.network.magic();
        let dump = DumpWriter::open(&config.dump_file)?;

        let mut connections = Vec::with_capacity(limit);
        connections.resize_with(limit, || None);

        Ok(Self {
            config,
            magic,
            handled: HashMap::new(),
            learned: HashMap::new(),
            connections,
            active_fds: BTreeSet::new(),
            dump,
        })
    }

    /// Queue `peers` for immediate dispatch.
    pub fn seed(&mut self, peers: impl IntoIterator<Item = PeerId>) {
        for peer in peers {
            self.learned.entry(peer).or_insert(None);
        }
    }

    /// Fold restore-file data into `handled`/`learned`.
    pub fn restore(&mut self, restored: Restored) {
        for (peer, count) in restored.handled {
            self.handled.insert(peer, count.min(self.config.reconnects));
        }
        for peer in restored.learned {
            if self.handled.get(&peer).copied().unwrap_or(0) < self.config.reconnects {
                self.learned.entry(peer).or_insert(None);
            }
        }
    }

    /// Run until no connection remains registered and nothing is left to
    /// (re)dispatch.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.poll_tick()?;
            self.dispatch_tick();
            if self.active_fds.is_empty() && self.learned.is_empty() {
                log::info!(target: "engine", "no peers left to contact, exiting");
                return Ok(());
            }
        }
    }

    fn poll_tick(&mut self) -> Result<(), Error> {
        let mut fds: Vec<libc::pollfd> = self
            .active_fds
            .iter()
            .map(|&fd| {
                let conn = self.connections[fd as usize]
                    .as_ref()
                    .expect("active fd must have a connection");
                let mut events = 0;
                if conn.wants_read() {
                    events |= libc::POLLIN;
                }
                if conn.wants_write() {
                    events |= libc::POLLOUT;
                }
                libc::pollfd {
                    fd,
                    events: events as i16,
                    revents: 0,
                }
            })
            .collect();

        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, 1000) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(Error::Io(err));
        }

        let now = Instant::now();
        let mut cleanups: Vec<(RawFd, bool)> = Vec::new();

        for pfd in &fds {
            let fd = pfd.fd;
            if pfd.revents == 0 {
                if self.is_timed_out(fd, now) {
                    log::debug!(target: "engine", "fd {fd} timed out");
                    cleanups.push((fd, false));
                }
                continue;
            }
            if pfd.revents & !(libc::POLLIN | libc::POLLOUT) != 0 {
                cleanups.push((fd, false));
                continue;
            }
            match self.step_connection(fd) {
                Ok(Some(reuse)) => cleanups.push((fd, reuse)),
                Ok(None) => {}
                Err(err) => {
                    log::debug!(target: "engine", "fd {fd} failed: {err}");
                    cleanups.push((fd, false));
                }
            }
        }

        for (fd, reuse) in cleanups {
            self.cleanup(fd, reuse);
        }

        Ok(())
    }

    fn is_timed_out(&self, fd: RawFd, now: Instant) -> bool {
        let conn = self.connections[fd as usize]
            .as_ref()
            .expect("registered fd must have a connection");
        let limit = match conn.state() {
            State::Connecting => Duration::from_secs(timeouts::CONNECT),
            _ => Duration::from_secs(timeouts::DEAD),
        };
        now.duration_since(conn.last_activity()) >= limit
    }

    /// Advance one connection's FSM by one step. `Ok(Some(reuse))` signals
    /// the caller should clean it up, re-queuing it for reconnect iff
    /// `reuse`.
    fn step_connection(&mut self, fd: RawFd) -> Result<Option<bool>, PeerError> {
        let magic = self.magic;
        let Reactor {
            connections,
            handled,
            learned,
            ..
        } = self;
        let conn = connections[fd as usize]
            .as_mut()
            .expect("registered fd must have a connection");

        match conn.state() {
            State::Connecting => {
                conn.finish_connect()?;
                let version = message::make_version(magic, &conn.peer);
                conn.stage_write(version);
                conn.set_state(State::SendVersion);
                Ok(None)
            }
            State::SendVersion | State::GenericWrite => match conn.write_one()? {
                IoStep::Incomplete => Ok(None),
                IoStep::Complete => {
                    conn.set_state(State::GenericRead);
                    Ok(None)
                }
            },
            State::GenericRead => match conn.read_one()? {
                IoStep::Incomplete => Ok(None),
                IoStep::Complete => {
                    let mut sink = EngineSink { handled, learned };
                    match conn.handle_frame(magic, &mut sink)? {
                        ParseOutcome::Reply(bytes) => {
                            conn.stage_write(bytes);
                            conn.set_state(State::GenericWrite);
                            Ok(None)
                        }
                        ParseOutcome::NoOp => Ok(None),
                        ParseOutcome::End => Ok(Some(true)),
                    }
                }
            },
            State::Connected | State::Fail | State::None => Ok(None),
        }
    }

    fn cleanup(&mut self, fd: RawFd, reuse: bool) {
        self.active_fds.remove(&fd);
        let Some(conn) = self.connections[fd as usize].take() else {
            return;
        };
        let lines = conn.dump_lines();
        if let Err(err) = self.dump.write_lines(&lines) {
            log::warn!(target: "engine", "failed to write dump lines for {}: {}", conn.peer, err);
        }
        if reuse {
            self.learned.insert(conn.peer, Some(Instant::now()));
            log::info!(target: "engine", "{} done, re-queued", conn.peer);
        } else {
            self.handled.insert(conn.peer, self.config.reconnects);
            log::info!(target: "engine", "{} retired", conn.peer);
        }
    }

    fn dispatch_tick(&mut self) {
        let now = Instant::now();
        let cooldown = if self.config.fixed_local_port {
            Duration::from_secs(timeouts::FIN_WAIT)
        } else {
            Duration::from_secs(timeouts::SHORT_COOLDOWN)
        };

        let candidates: Vec<PeerId> = self.learned.keys().copied().collect();
        let mut dispatched = 0usize;

        for peer in candidates {
            if dispatched >= self.config.max_connects_per_tick {
                break;
            }
            let Some(at) = self.learned.get(&peer).copied() else {
                continue;
            };
            if let Some(t) = at {
                if now.duration_since(t) < cooldown {
                    continue;
                }
            }

            let attempts = self.handled.get(&peer).copied().unwrap_or(0);
            if attempts >= self.config.reconnects {
                self.learned.remove(&peer);
                log::info!(target: "engine", "{peer} reached the reconnect cap, dropping");
                continue;
            }

            std::thread::sleep(DISPATCH_SLEEP);
            match self.connect_peer(peer) {
                Ok(fd) => {
                    self.handled.insert(peer, attempts + 1);
                    self.learned.remove(&peer);
                    self.active_fds.insert(fd);
                    dispatched += 1;
                }
                Err(DispatchError::OutOfSockets) => {
                    log::warn!(target: "engine", "out of sockets, pausing this reconnect pass");
                    break;
                }
                Err(err) => {
                    log::warn!(target: "engine", "failed to connect to {peer}: {err}");
                    self.learned.remove(&peer);
                }
            }
        }
    }

    fn connect_peer(&mut self, peer: PeerId) -> Result<RawFd, DispatchError> {
        let target: SocketAddr = peer.to_socket_addr();
        let bind_addr = self
            .config
            .bind_for(&peer.addr())
            .ok_or(DispatchError::NoMatchingBindAddress(peer.addr()))?;

        let domain = match target {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(|e| {
            if matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE)) {
                DispatchError::OutOfSockets
            } else {
                DispatchError::Io(e)
            }
        })?;

        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.bind(&bind_addr.into())?;

        match socket.connect(&target.into()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(DispatchError::Io(e)),
        }

        let fd = socket.as_raw_fd();
        if fd as usize >= self.connections.len() {
            return Err(DispatchError::Io(io::Error::new(
                io::ErrorKind::Other,
                "fd exceeds the pre-allocated connection table",
            )));
        }
        self.connections[fd as usize] = Some(PeerConnection::new(peer, socket, self.magic));
        Ok(fd)
    }
}

/// Narrow view of engine bookkeeping handed to a connection's filter, so
/// the filter can learn new peers without holding a back-reference to the
/// whole reactor.
struct EngineSink<'a> {
    handled: &'a HashMap<PeerId, u32>,
    learned: &'a mut HashMap<PeerId, Option<Instant>>,
}

impl NodeSink for EngineSink<'_> {
    fn is_known(&self, peer: &PeerId) -> bool {
        self.handled.contains_key(peer) || self.learned.contains_key(peer)
    }

    fn learn(&mut self, peer: PeerId) {
        self.learned.entry(peer).or_insert(None);
    }
}

fn raise_fd_limit() -> io::Result<()> {
    let mut current = unsafe { std::mem::zeroed::<libc::rlimit>() };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut current) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let desired = (1u64 << 16).min(current.rlim_max);
    let target = libc::rlimit {
        rlim_cur: desired,
        rlim_max: current.rlim_max,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &target) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn fd_limit() -> io::Result<usize> {
    let mut current = unsafe { std::mem::zeroed::<libc::rlimit>() };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut current) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(current.rlim_cur as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn test_config(dump_file: std::path::PathBuf) -> Config {
        Config {
            bind_v4: Some(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            bind_v6: None,
            seeds: Vec::new(),
            restore_file: None,
            dump_file,
            log_file: std::path::PathBuf::from("/dev/null"),
            network: crate::wire::Network::Testnet3,
            reconnects: crate::wire::constants::RECONNECTS,
            max_connects_per_tick: crate::wire::constants::MAX_CONNECTS_PER_TICK,
            fixed_local_port: false,
        }
    }

    #[test]
    fn terminates_immediately_with_no_seeds_and_no_restore() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = Reactor::new(test_config(dir.path().join("dump.txt"))).unwrap();
        reactor.run().unwrap();
        assert!(reactor.active_fds.is_empty());
        assert!(reactor.learned.is_empty());
    }

    #[test]
    fn restore_seeds_handled_and_learned() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = Reactor::new(test_config(dir.path().join("dump.txt"))).unwrap();

        let retired: PeerId = "[203.0.113.1]:8333".parse().unwrap();
        let pending: PeerId = "[203.0.113.2]:8333".parse().unwrap();

        let mut restored = Restored::default();
        restored.handled.insert(retired, crate::wire::constants::RECONNECTS);
        restored.learned.push(retired);
        restored.learned.push(pending);

        reactor.restore(restored);

        assert_eq!(
            reactor.handled.get(&retired).copied(),
            Some(crate::wire::constants::RECONNECTS)
        );
        assert!(!reactor.learned.contains_key(&retired));
        assert!(reactor.learned.contains_key(&pending));
    }

    #[test]
    fn dispatch_tick_retires_peers_at_the_reconnect_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = Reactor::new(test_config(dir.path().join("dump.txt"))).unwrap();

        let capped: PeerId = "[203.0.113.3]:8333".parse().unwrap();
        reactor.handled.insert(capped, reactor.config.reconnects);
        reactor.learned.insert(capped, None);

        reactor.dispatch_tick();

        assert!(!reactor.learned.contains_key(&capped));
    }

    #[test]
    fn dispatch_tick_respects_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = Reactor::new(test_config(dir.path().join("dump.txt"))).unwrap();

        let cooling: PeerId = "[203.0.113.4]:8333".parse().unwrap();
        reactor.learned.insert(cooling, Some(Instant::now()));

        reactor.dispatch_tick();

        // Still cooling down: neither dispatched into a connection nor
        // dropped from `learned`.
        assert!(reactor.learned.contains_key(&cooling));
        assert!(reactor.active_fds.is_empty());
    }
}
