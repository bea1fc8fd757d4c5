//! Write-ahead log (§4.2): durable, sequence-ordered record storage with a
//! separate commit marker so recovery can distinguish "written" from
//! "safe to treat as durable."
//!
//! ```text
//! initialize() -> scan segments, rebuild cursors
//! append(payload) -> Data record, returns assigned sequence
//! commit(sequence) -> Commit record + wal-commit pointer advance
//! get_uncommitted_records() -> records with sequence > last committed
//! truncate(sequence) -> drop whole closed segments below the cutoff
//! ```

mod commit;
mod format;
mod reader;
mod segment;
mod writer;

pub use format::{RecordType, WalHeader, WAL_HEADER_SIZE};
pub use reader::WalRecord;
pub use writer::DataRecord;

use crate::config::{SyncMode, WalConfig};
use crate::error::{CoreError, Result};
use commit::CommitFile;
use reader::SegmentReader;
use segment::list_segments;
use std::fs;
use std::path::PathBuf;
use writer::WalWriter;

pub struct Wal {
    wal_dir: PathBuf,
    writer: WalWriter,
    last_committed: u64,
}

impl Wal {
    /// Scan the WAL directory, rebuild the append cursor from existing
    /// segments, and read the durable commit pointer.
    pub fn initialize(config: &WalConfig) -> Result<Self> {
        fs::create_dir_all(&config.wal_dir).map_err(CoreError::Io)?;
        let segments = list_segments(&config.wal_dir).map_err(CoreError::Io)?;

        let (active_start_seq, next_seq) = match segments.last() {
            None => (0, 0),
            Some((start_seq, path)) => {
                let mut reader = SegmentReader::open(path).map_err(CoreError::Io)?;
                let mut next = *start_seq;
                let mut saw_any = false;
                while let Some(record) = reader.read_next().map_err(CoreError::Io)? {
                    next = record.sequence + 1;
                    saw_any = true;
                }
                if saw_any {
                    (*start_seq, next)
                } else {
                    (*start_seq, *start_seq)
                }
            }
        };

        let last_committed = CommitFile::new(&config.wal_dir)
            .read()
            .map_err(CoreError::Io)?;

        let writer = WalWriter::open(
            &config.wal_dir,
            active_start_seq,
            next_seq,
            config.max_segment_bytes,
            config.sync_mode,
        )?;

        tracing::info!(
            target: "ingest",
            next_seq,
            last_committed,
            "WAL initialized"
        );

        Ok(Self {
            wal_dir: config.wal_dir.clone(),
            writer,
            last_committed,
        })
    }

    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        self.writer.append(payload)
    }

    pub fn commit(&mut self, sequence: u64) -> Result<()> {
        self.writer.commit(sequence)?;
        self.last_committed = self.last_committed.max(sequence);
        Ok(())
    }

    pub fn last_committed(&self) -> u64 {
        self.last_committed
    }

    /// All data records with sequence strictly greater than the last
    /// committed sequence, across every segment, in order. Used on startup
    /// to replay work that was appended but never confirmed durable at the
    /// consumer (§4.2 recovery contract).
    pub fn get_uncommitted_records(&self) -> Result<Vec<DataRecord>> {
        let segments = list_segments(&self.wal_dir).map_err(CoreError::Io)?;
        let mut out = Vec::new();
        for (_, path) in segments {
            let mut reader = SegmentReader::open(&path).map_err(CoreError::Io)?;
            while let Some(record) = reader.read_next().map_err(CoreError::Io)? {
                if record.sequence <= self.last_committed {
                    continue;
                }
                if let RecordType::Data = record.record_type {
                    out.push(DataRecord {
                        sequence: record.sequence,
                        payload: record.payload,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Delete whole closed segment files whose entire contents are below
    /// `sequence`, while always keeping the segment that contains the last
    /// COMMIT marker so recovery never loses the durability boundary.
    pub fn truncate(&mut self, sequence: u64) -> Result<()> {
        let mut segments = list_segments(&self.wal_dir).map_err(CoreError::Io)?;
        if segments.len() <= 1 {
            return Ok(());
        }
        // Never remove the currently active (last) segment.
        segments.pop();

        for (_start_seq, path) in segments {
            let max_seq_in_segment = self.max_sequence_in_segment(&path)?;
            if max_seq_in_segment <= sequence && max_seq_in_segment <= self.last_committed {
                fs::remove_file(&path).map_err(CoreError::Io)?;
                tracing::debug!(
                    target: "ingest",
                    segment = %path.display(),
                    "truncated WAL segment"
                );
            }
        }
        Ok(())
    }

    fn max_sequence_in_segment(&self, path: &PathBuf) -> Result<u64> {
        let mut reader = SegmentReader::open(path).map_err(CoreError::Io)?;
        let mut max_seq = 0u64;
        while let Some(record) = reader.read_next().map_err(CoreError::Io)? {
            max_seq = max_seq.max(record.sequence);
        }
        Ok(max_seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> WalConfig {
        WalConfig {
            wal_dir: dir.to_path_buf(),
            sync_mode: SyncMode::PerRecordSync,
            max_segment_bytes: 64,
        }
    }

    #[test]
    fn fresh_initialize_has_no_uncommitted_records() {
        let dir = tempdir().unwrap();
        let wal = Wal::initialize(&config_in(dir.path())).unwrap();
        assert_eq!(wal.last_committed(), 0);
        assert!(wal.get_uncommitted_records().unwrap().is_empty());
    }

    #[test]
    fn uncommitted_records_survive_reinitialize() {
        let dir = tempdir().unwrap();
        {
            let mut wal = Wal::initialize(&config_in(dir.path())).unwrap();
            wal.append(b"a").unwrap();
            wal.append(b"b").unwrap();
            // No commit() call: both records are uncommitted.
        }
        let wal = Wal::initialize(&config_in(dir.path())).unwrap();
        let uncommitted = wal.get_uncommitted_records().unwrap();
        assert_eq!(uncommitted.len(), 2);
        assert_eq!(uncommitted[0].payload, b"a");
    }

    #[test]
    fn committed_records_are_excluded_from_uncommitted() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::initialize(&config_in(dir.path())).unwrap();
        let s1 = wal.append(b"a").unwrap();
        wal.append(b"b").unwrap();
        wal.commit(s1).unwrap();

        let uncommitted = wal.get_uncommitted_records().unwrap();
        assert_eq!(uncommitted.len(), 1);
        assert_eq!(uncommitted[0].payload, b"b");
    }

    #[test]
    fn truncate_keeps_active_segment_and_commit_boundary() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::initialize(&config_in(dir.path())).unwrap();
        for _ in 0..8 {
            wal.append(b"0123456789").unwrap();
        }
        let last = wal.writer.next_sequence() - 1;
        wal.commit(last).unwrap();

        let before = list_segments(dir.path()).unwrap().len();
        assert!(before > 1, "expected multiple segments from rotation");

        wal.truncate(last).unwrap();
        let after = list_segments(dir.path()).unwrap();
        assert!(!after.is_empty());
        // The active (last) segment must still be present.
        assert_eq!(after.last().unwrap().0, list_segments(dir.path()).unwrap().last().unwrap().0);
    }
}
