//! Dump file writer and restore file reader (§4.12).
//!
//! Grounded in the original engine's `addr_filter::dump` (append-only
//! `source,n1,n2,...` lines) and `btc_scan::restore_nodes` (same shape,
//! read back to pre-populate `handled`/`learned`).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use crate::address::PeerId;
use crate::wire::constants::RECONNECTS;

/// Appends dump lines to a file, one per cleaned-up connection.
pub struct DumpWriter {
    file: File,
}

impl DumpWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    /// Append one dump line per string in `lines`, each already formatted
    /// as `source,n1,n2,...`.
    pub fn write_lines(&mut self, lines: &[String]) -> io::Result<()> {
        for line in lines {
            writeln!(self.file, "{line}")?;
        }
        self.file.flush()
    }
}

/// Parsed restore-file contents, ready to seed a fresh engine.
#[derive(Debug, Default)]
pub struct Restored {
    pub handled: HashMap<PeerId, u32>,
    pub learned: Vec<PeerId>,
}

/// Parse a restore file into `handled`/`learned` seed data.
///
/// Each line's first comma-separated field becomes a `handled` entry
/// (count 1, or incremented if repeated across lines). Every subsequent
/// token longer than 4 characters that isn't already retired in `handled`
/// becomes a `learned` entry, unless it parses as a legacy `version=` or
/// `agent=` marker, which some historical dump variants carried and which
/// restore tolerates without emitting.
pub fn restore(path: &Path) -> io::Result<Restored> {
    let reader = BufReader::new(File::open(path)?);
    let mut out = Restored::default();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split(',');
        let Some(source) = fields.next() else {
            continue;
        };
        let Ok(source) = source.parse::<PeerId>() else {
            continue;
        };
        *out.handled.entry(source).or_insert(0) += 1;

        for token in fields {
            if token.is_empty() || token.starts_with("version=") || token.starts_with("agent=") {
                continue;
            }
            if token.len() <= 4 {
                continue;
            }
            let Ok(neighbor) = token.parse::<PeerId>() else {
                continue;
            };
            if out.handled.get(&neighbor).copied().unwrap_or(0) >= RECONNECTS {
                continue;
            }
            out.learned.push(neighbor);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn restore_splits_handled_and_learned() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[203.0.113.1]:8333,version=x,[203.0.113.2]:8333"
        )
        .unwrap();
        writeln!(file, "[203.0.113.3]:8333,").unwrap();
        file.flush().unwrap();

        let restored = restore(file.path()).unwrap();
        let p1: PeerId = "[203.0.113.1]:8333".parse().unwrap();
        let p2: PeerId = "[203.0.113.2]:8333".parse().unwrap();
        let p3: PeerId = "[203.0.113.3]:8333".parse().unwrap();

        assert_eq!(restored.handled.get(&p1), Some(&1));
        assert_eq!(restored.handled.get(&p3), Some(&1));
        assert!(restored.learned.contains(&p2));
        assert!(!restored.learned.contains(&p1));
    }

    #[test]
    fn dump_writer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.txt");
        let mut writer = DumpWriter::open(&path).unwrap();
        writer
            .write_lines(&["[203.0.113.1]:8333,[203.0.113.2]:8333".to_string()])
            .unwrap();
        writer
            .write_lines(&["[203.0.113.3]:8333,".to_string()])
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "[203.0.113.1]:8333,[203.0.113.2]:8333\n[203.0.113.3]:8333,\n"
        );
    }
}
