//! WAL segment reader: sequential scan with CRC verification.
//!
//! A corrupted record terminates the scan at that point; everything from
//! there on is treated as uncommitted garbage (§4.2 invariant), never
//! surfaced to the caller as a record.

use super::format::{WAL_HEADER_SIZE, WalHeader};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct WalRecord {
    pub sequence: u64,
    pub record_type: super::format::RecordType,
    pub payload: Vec<u8>,
}

pub struct SegmentReader<R> {
    reader: R,
}

impl SegmentReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }
}

impl<R: Read> SegmentReader<R> {
    /// Read the next record. Returns `Ok(None)` at a clean EOF. A checksum
    /// mismatch or truncated trailing record is treated as end-of-valid-data
    /// and also yields `Ok(None)` rather than an error, since by contract
    /// that tail is uncommitted garbage the caller should simply stop at.
    pub fn read_next(&mut self) -> io::Result<Option<WalRecord>> {
        let mut header_buf = [0u8; WAL_HEADER_SIZE];
        if let Err(e) = self.reader.read_exact(&mut header_buf) {
            return match e.kind() {
                io::ErrorKind::UnexpectedEof => Ok(None),
                _ => Err(e),
            };
        }
        let header = match WalHeader::from_bytes(&header_buf) {
            Ok(h) => h,
            Err(_) => return Ok(None),
        };

        let mut payload = vec![0u8; header.payload_len as usize];
        if self.reader.read_exact(&mut payload).is_err() {
            // Truncated write (crash mid-append): nothing after this point
            // is trustworthy.
            return Ok(None);
        }

        if !header.verify(&payload) {
            tracing::warn!(
                target: "ingest",
                sequence = header.sequence,
                "WAL checksum mismatch, truncating scan"
            );
            return Ok(None);
        }

        Ok(Some(WalRecord {
            sequence: header.sequence,
            record_type: header.record_type,
            payload,
        }))
    }

    pub fn into_iter_records(self) -> WalRecordIter<R> {
        WalRecordIter { reader: self }
    }
}

pub struct WalRecordIter<R: Read> {
    reader: SegmentReader<R>,
}

impl<R: Read> Iterator for WalRecordIter<R> {
    type Item = WalRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_next().ok().flatten()
    }
}
