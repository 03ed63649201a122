//! File-backed `log::Log` sink.
//!
//! Grounded in the original engine's `log.h`/`log.cc` `logit`: local-time
//! timestamp, non-printable bytes replaced with `?`, one flushed line per
//! record. Installed once at startup as the process-wide [`log`] backend,
//! matching how `p2p/src/fsm.rs` calls `log::info!`/`log::warn!` with a
//! `target:` rather than talking to a concrete logger type directly.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use log::{Level, Metadata, Record};

/// A `log::Log` implementation that appends formatted lines to a file.
pub struct FileLogger {
    file: Mutex<File>,
    level: Level,
}

impl FileLogger {
    /// Open (creating if needed) `path` for append and install this as the
    /// global logger at `level`.
    pub fn init(path: &Path, level: Level) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let logger = Box::new(FileLogger {
            file: Mutex::new(file),
            level,
        });
        log::set_max_level(level.to_level_filter());
        log::set_boxed_logger(logger).expect("logger already installed");
        Ok(())
    }
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = Local::now().format("%a, %d %b %Y %H:%M:%S");
        let message = record.args().to_string();
        let message = message.trim_end_matches('\n');
        let sanitized: String = message
            .chars()
            .map(|c| if c.is_control() { '?' } else { c })
            .collect();
        let tag = record.target();

        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{timestamp} {tag}: {sanitized}");
            let _ = file.flush();
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_control_characters_and_trailing_newline() {
        let message = "bad\tbyte\nhere\n";
        let sanitized: String = message
            .trim_end_matches('\n')
            .chars()
            .map(|c| if c.is_control() { '?' } else { c })
            .collect();
        assert_eq!(sanitized, "bad?byte?here");
    }
}
