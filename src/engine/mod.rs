//! The crawl engine: a [`reactor::Reactor`] wired up from [`crate::config::Config`].

pub mod connection;
pub mod reactor;

pub use reactor::Reactor;

use crate::config::Config;
use crate::error::{ConfigError, Error};

/// Build and run a fully wired engine from a validated configuration:
/// restore prior state if asked, seed the configured peers, and run the
/// crawl loop to completion.
pub fn run(config: Config) -> Result<(), Error> {
    let mut reactor = Reactor::new(config.clone())?;

    if let Some(path) = &config.restore_file {
        let restored = crate::dump::restore(path).map_err(|source| ConfigError::RestoreFile {
            path: path.clone(),
            source,
        })?;
        log::info!(
            target: "engine",
            "restored {} handled and {} learned peers from {}",
            restored.handled.len(),
            restored.learned.len(),
            path.display()
        );
        reactor.restore(restored);
    }

    reactor.seed(config.seeds.iter().copied());
    reactor.run()
}
