//! WAL segment file naming and directory scanning.
//!
//! Segments are named `wal-{start_seq:016x}.log`, where `start_seq` is the
//! sequence of the first record in the file (§6).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn segment_path(wal_dir: &Path, start_seq: u64) -> PathBuf {
    wal_dir.join(format!("wal-{start_seq:016x}.log"))
}

fn parse_start_seq(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_prefix("wal-")?.strip_suffix(".log")?;
    u64::from_str_radix(stem, 16).ok()
}

/// List existing segment files in the directory, sorted ascending by their
/// start sequence.
pub fn list_segments(wal_dir: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    fs::create_dir_all(wal_dir)?;
    let mut segments = Vec::new();
    for entry in fs::read_dir(wal_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(start_seq) = parse_start_seq(name) {
            segments.push((start_seq, entry.path()));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn segment_path_is_hex_padded() {
        let dir = PathBuf::from("/tmp/wal");
        let path = segment_path(&dir, 5);
        assert_eq!(path.file_name().unwrap(), "wal-0000000000000005.log");
    }

    #[test]
    fn list_segments_sorts_ascending() {
        let dir = tempdir().unwrap();
        fs::write(segment_path(dir.path(), 100), b"").unwrap();
        fs::write(segment_path(dir.path(), 1), b"").unwrap();
        fs::write(segment_path(dir.path(), 50), b"").unwrap();
        fs::write(dir.path().join("not-a-segment.txt"), b"").unwrap();

        let segments = list_segments(dir.path()).unwrap();
        let seqs: Vec<u64> = segments.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![1, 50, 100]);
    }
}
