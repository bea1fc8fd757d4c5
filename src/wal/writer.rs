//! WAL writer: segment rotation, sync-mode-aware flushing, commit marker
//! bookkeeping (§4.2).

use super::commit::CommitFile;
use super::format::{RecordType, WalHeader, encode_commit_payload};
use super::reader::WalRecord;
use super::segment::segment_path;
use crate::config::SyncMode;
use crate::error::{CoreError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub struct WalWriter {
    wal_dir: PathBuf,
    active: BufWriter<File>,
    active_start_seq: u64,
    active_size: u64,
    next_seq: u64,
    max_segment_bytes: u64,
    sync_mode: SyncMode,
    unsynced_records: usize,
    last_sync_at: Instant,
    commit_file: CommitFile,
}

impl WalWriter {
    /// Open (creating if needed) the segment that should receive the next
    /// append, positioned at `next_seq`.
    pub fn open(
        wal_dir: impl Into<PathBuf>,
        active_start_seq: u64,
        next_seq: u64,
        max_segment_bytes: u64,
        sync_mode: SyncMode,
    ) -> Result<Self> {
        let wal_dir = wal_dir.into();
        fs::create_dir_all(&wal_dir).map_err(CoreError::Io)?;
        let path = segment_path(&wal_dir, active_start_seq);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(CoreError::Io)?;
        let active_size = file.metadata().map_err(CoreError::Io)?.len();
        let commit_file = CommitFile::new(&wal_dir);
        Ok(Self {
            wal_dir,
            active: BufWriter::new(file),
            active_start_seq,
            active_size,
            next_seq,
            max_segment_bytes,
            sync_mode,
            unsynced_records: 0,
            last_sync_at: Instant::now(),
            commit_file,
        })
    }

    fn rotate_if_needed(&mut self) -> Result<()> {
        if self.active_size < self.max_segment_bytes {
            return Ok(());
        }
        self.active.flush().map_err(CoreError::Io)?;
        let path = segment_path(&self.wal_dir, self.next_seq);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(CoreError::Io)?;
        self.active = BufWriter::new(file);
        self.active_start_seq = self.next_seq;
        self.active_size = 0;
        Ok(())
    }

    fn maybe_sync(&mut self, just_wrote_commit: bool) -> Result<()> {
        let should_sync = match self.sync_mode {
            SyncMode::PerRecordSync => true,
            SyncMode::NoSync => false,
            SyncMode::BatchedSync {
                batch_size,
                max_delay,
            } => {
                self.unsynced_records += 1;
                self.unsynced_records >= batch_size || self.last_sync_at.elapsed() >= max_delay
            }
        };
        // A commit marker always forces a durability barrier regardless of
        // sync mode: it is the record that tells recovery what's safe.
        if should_sync || just_wrote_commit {
            self.active.flush().map_err(CoreError::Io)?;
            self.active
                .get_ref()
                .sync_data()
                .map_err(CoreError::Io)?;
            self.unsynced_records = 0;
            self.last_sync_at = Instant::now();
        }
        Ok(())
    }

    /// Append a data record, returning its assigned sequence number.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        self.rotate_if_needed()?;
        let sequence = self.next_seq;
        let header = WalHeader::new(sequence, RecordType::Data, payload);
        self.active.write_all(&header.to_bytes()).map_err(CoreError::Io)?;
        self.active.write_all(payload).map_err(CoreError::Io)?;
        self.active_size += (super::format::WAL_HEADER_SIZE + payload.len()) as u64;
        self.next_seq += 1;
        self.maybe_sync(false)?;
        Ok(sequence)
    }

    /// Write a commit marker covering all records up to and including
    /// `sequence`, then advance the durable `wal-commit` pointer.
    /// Monotonic: never moves the pointer backwards.
    pub fn commit(&mut self, sequence: u64) -> Result<()> {
        self.rotate_if_needed()?;
        let payload = encode_commit_payload(sequence);
        let header = WalHeader::new(self.next_seq, RecordType::Commit, &payload);
        self.active.write_all(&header.to_bytes()).map_err(CoreError::Io)?;
        self.active.write_all(&payload).map_err(CoreError::Io)?;
        self.active_size += (super::format::WAL_HEADER_SIZE + payload.len()) as u64;
        self.next_seq += 1;
        self.maybe_sync(true)?;

        let previous = self.commit_file.read().map_err(CoreError::Io)?;
        self.commit_file
            .write(sequence.max(previous))
            .map_err(CoreError::Io)?;
        Ok(())
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_seq
    }
}

/// A decoded WAL data record exposed to callers that never need the commit
/// marker framing.
#[derive(Debug, Clone)]
pub struct DataRecord {
    pub sequence: u64,
    pub payload: Vec<u8>,
}

impl TryFrom<WalRecord> for DataRecord {
    type Error = CoreError;

    fn try_from(record: WalRecord) -> Result<Self> {
        match record.record_type {
            RecordType::Data => Ok(DataRecord {
                sequence: record.sequence,
                payload: record.payload,
            }),
            RecordType::Commit => Err(CoreError::Durability(
                "expected a data record, found a commit marker".into(),
            )),
        }
    }
}

pub const DEFAULT_FLUSH_CHECK: Duration = Duration::from_millis(50);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::reader::SegmentReader;
    use tempfile::tempdir;

    #[test]
    fn append_assigns_increasing_sequences() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(
            dir.path(),
            0,
            0,
            1024 * 1024,
            SyncMode::NoSync,
        )
        .unwrap();
        let s1 = writer.append(b"one").unwrap();
        let s2 = writer.append(b"two").unwrap();
        assert_eq!(s1, 0);
        assert_eq!(s2, 1);
    }

    #[test]
    fn commit_advances_commit_file_monotonically() {
        let dir = tempdir().unwrap();
        let mut writer =
            WalWriter::open(dir.path(), 0, 0, 1024 * 1024, SyncMode::PerRecordSync).unwrap();
        writer.append(b"a").unwrap();
        writer.append(b"b").unwrap();
        writer.commit(1).unwrap();
        let commit_file = CommitFile::new(dir.path());
        assert_eq!(commit_file.read().unwrap(), 1);

        // A lower commit must not regress the pointer.
        writer.commit(0).unwrap();
        assert_eq!(commit_file.read().unwrap(), 1);
    }

    #[test]
    fn rotates_segment_when_size_exceeded() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path(), 0, 0, 40, SyncMode::NoSync).unwrap();
        writer.append(b"0123456789").unwrap();
        writer.append(b"0123456789").unwrap();
        writer.append(b"0123456789").unwrap();
        let segments = super::super::segment::list_segments(dir.path()).unwrap();
        assert!(segments.len() >= 2, "expected rotation to produce a second segment");
    }

    #[test]
    fn written_records_are_readable_back() {
        let dir = tempdir().unwrap();
        let mut writer =
            WalWriter::open(dir.path(), 0, 0, 1024 * 1024, SyncMode::PerRecordSync).unwrap();
        writer.append(b"payload-a").unwrap();
        writer.append(b"payload-b").unwrap();
        drop(writer);

        let path = segment_path(dir.path(), 0);
        let mut reader = SegmentReader::open(path).unwrap();
        let r1 = reader.read_next().unwrap().unwrap();
        assert_eq!(r1.payload, b"payload-a");
        let r2 = reader.read_next().unwrap().unwrap();
        assert_eq!(r2.payload, b"payload-b");
    }
}
