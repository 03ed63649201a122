//! Thin binary: parse the CLI, install the file logger, ignore the signals
//! that a peer's socket closure would otherwise deliver, and run the
//! engine to completion.

use std::process::ExitCode;
use std::thread;

use signal_hook::consts::{SIGHUP, SIGPIPE};
use signal_hook::iterator::Signals;

use p2p_crawl::config::{Cli, Config};
use p2p_crawl::logger::FileLogger;

fn main() -> ExitCode {
    let cli: Cli = argh::from_env();

    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("p2p-crawl: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = FileLogger::init(&config.log_file, log::Level::Debug) {
        eprintln!(
            "p2p-crawl: failed to open log file {:?}: {err}",
            config.log_file
        );
        return ExitCode::FAILURE;
    }

    match spawn_signal_ignorer() {
        Ok(_handle) => {}
        Err(err) => log::warn!(target: "main", "failed to install signal handlers: {err}"),
    }

    match p2p_crawl::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!(target: "main", "fatal: {err}");
            eprintln!("p2p-crawl: {err}");
            ExitCode::FAILURE
        }
    }
}

/// A peer closing its end of the socket must never raise `SIGPIPE`, and a
/// terminal hangup (`SIGHUP`) must never kill a crawl that's meant to keep
/// running unattended. A background thread drains both and simply discards
/// them for the lifetime of the process; every other signal keeps its
/// default, process-terminating action, matching the "no cancellation API"
/// design of the crawl loop itself.
fn spawn_signal_ignorer() -> Result<thread::JoinHandle<()>, std::io::Error> {
    let mut signals = Signals::new([SIGPIPE, SIGHUP])?;
    Ok(thread::spawn(move || {
        for _ in signals.forever() {
            // Discard: the crawl loop never needs to react to these.
        }
    }))
}
