//! Binary WAL record envelope (§6).
//!
//! A fixed 17-byte header `(sequence:u64, record_type:u8, payload_len:u32,
//! crc32c:u32)` followed by `payload_len` opaque bytes. Field order follows
//! the teacher's `wal_v2::WalHeader` convention: widest field first,
//! little-endian throughout, checksum computed over the payload only so the
//! header itself never needs re-checksumming.

use crc32fast::Hasher;

/// Header size in bytes: 8 (sequence) + 1 (record_type) + 4 (payload_len) +
/// 4 (crc32c).
pub const WAL_HEADER_SIZE: usize = 17;

/// Discriminates a WAL record as a data payload or a commit marker (§3).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Data = 0,
    Commit = 1,
}

impl TryFrom<u8> for RecordType {
    type Error = std::io::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RecordType::Data),
            1 => Ok(RecordType::Commit),
            other => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown WAL record type: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub sequence: u64,
    pub record_type: RecordType,
    pub payload_len: u32,
    pub crc32c: u32,
}

impl WalHeader {
    pub fn new(sequence: u64, record_type: RecordType, payload: &[u8]) -> Self {
        Self {
            sequence,
            record_type,
            payload_len: payload.len() as u32,
            crc32c: crc32_checksum(payload),
        }
    }

    pub fn to_bytes(self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8] = self.record_type as u8;
        buf[9..13].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[13..17].copy_from_slice(&self.crc32c.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; WAL_HEADER_SIZE]) -> std::io::Result<Self> {
        let sequence = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let record_type = RecordType::try_from(buf[8])?;
        let payload_len = u32::from_le_bytes(buf[9..13].try_into().unwrap());
        let crc32c = u32::from_le_bytes(buf[13..17].try_into().unwrap());
        Ok(Self {
            sequence,
            record_type,
            payload_len,
            crc32c,
        })
    }

    pub fn verify(&self, payload: &[u8]) -> bool {
        self.crc32c == crc32_checksum(payload)
    }
}

#[inline]
pub fn crc32_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encode a commit marker's payload: the max committed sequence.
pub fn encode_commit_payload(max_sequence: u64) -> Vec<u8> {
    max_sequence.to_le_bytes().to_vec()
}

pub fn decode_commit_payload(payload: &[u8]) -> std::io::Result<u64> {
    let bytes: [u8; 8] = payload.try_into().map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed commit payload")
    })?;
    Ok(u64::from_le_bytes(bytes))
}
