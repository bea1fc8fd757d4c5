//! Drop audit trail (§4.4, §6): `{dataRoot}/_audit/dropped_events.jsonl`.
//! Every dropped event is recorded with a reason so downstream consumers
//! can detect gaps even when the pipeline itself recovers silently.

use crate::core_types::{ProviderId, Symbol};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Serialize)]
struct DropRecord<'a> {
    timestamp: DateTime<Utc>,
    event_timestamp: DateTime<Utc>,
    event_type: &'a str,
    symbol: &'a Symbol,
    sequence: u64,
    source: &'a ProviderId,
    reason: &'a str,
}

pub struct DropAuditTrail {
    file: Mutex<std::fs::File>,
}

impl DropAuditTrail {
    pub fn open(data_root: impl AsRef<Path>) -> Result<Self> {
        let dir = data_root.as_ref().join("_audit");
        fs::create_dir_all(&dir).map_err(CoreError::Io)?;
        let path: PathBuf = dir.join("dropped_events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(CoreError::Io)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn record(
        &self,
        event_timestamp: DateTime<Utc>,
        event_type: &str,
        symbol: &Symbol,
        sequence: u64,
        source: &ProviderId,
        reason: &str,
    ) -> Result<()> {
        let record = DropRecord {
            timestamp: Utc::now(),
            event_timestamp,
            event_type,
            symbol,
            sequence,
            source,
            reason,
        };
        let line = serde_json::to_string(&record).map_err(CoreError::Serde)?;
        let mut file = self.file.lock().unwrap();
        writeln!(file, "{line}").map_err(CoreError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use tempfile::tempdir;

    #[test]
    fn recorded_drops_are_appended_as_jsonl() {
        let dir = tempdir().unwrap();
        let trail = DropAuditTrail::open(dir.path()).unwrap();
        let symbol = Symbol::new("SPY");
        let source = ProviderId::new("alpaca");
        trail
            .record(Utc::now(), "trade", &symbol, 7, &source, "backpressure_queue_full")
            .unwrap();

        let path = dir.path().join("_audit/dropped_events.jsonl");
        let file = std::fs::File::open(path).unwrap();
        let lines: Vec<String> = BufReader::new(file).lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"reason\":\"backpressure_queue_full\""));
    }
}
