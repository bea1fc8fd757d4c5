//! Replay (§2 ambient component, §6): reads a stored JSONL file and
//! republishes each event through the same [`Publisher`] path used by live
//! ingestion and backfill, so replayed data gets the same dedup/validation
//! treatment as anything else.

use crate::collectors::Publisher;
use crate::error::{CoreError, Result};
use crate::event::MarketEvent;
use std::io::BufRead;
use std::path::Path;

/// Outcome counters for one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub read: usize,
    pub published: usize,
    pub skipped: usize,
    pub malformed: usize,
}

/// Reads `path` line by line as JSONL `MarketEvent`s and republishes each
/// through `publisher`. A malformed line is logged and skipped rather than
/// aborting the whole replay, matching the WAL recovery scan's
/// stop-at-first-corruption-per-record (not per-file) posture.
pub fn replay_file(path: &Path, publisher: &dyn Publisher) -> Result<ReplaySummary> {
    let file = std::fs::File::open(path).map_err(CoreError::Io)?;
    let reader: Box<dyn BufRead> = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Box::new(std::io::BufReader::new(flate2::read::GzDecoder::new(file)))
    } else {
        Box::new(std::io::BufReader::new(file))
    };

    let mut summary = ReplaySummary::default();
    for line in reader.lines() {
        let line = line.map_err(CoreError::Io)?;
        if line.trim().is_empty() {
            continue;
        }
        summary.read += 1;
        match serde_json::from_str::<MarketEvent>(&line) {
            Ok(event) => {
                if publisher.publish(event) {
                    summary.published += 1;
                } else {
                    summary.skipped += 1;
                }
            }
            Err(err) => {
                summary.malformed += 1;
                tracing::warn!(target: "ingest", path = %path.display(), error = %err, "skipping malformed replay line");
            }
        }
    }
    tracing::info!(target: "ingest", path = %path.display(), read = summary.read, published = summary.published, "replay complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{ProviderId, Symbol};
    use crate::event::{Aggressor, EventPayload, TradePayload};
    use rust_decimal::Decimal;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct RecordingPublisher {
        accept: bool,
        events: Mutex<Vec<MarketEvent>>,
    }
    impl Publisher for RecordingPublisher {
        fn publish(&self, event: MarketEvent) -> bool {
            self.events.lock().unwrap().push(event);
            self.accept
        }
    }

    fn trade_line(symbol: &str, seq: u64) -> String {
        let event = MarketEvent::new(
            "2024-01-02T14:30:00Z".parse().unwrap(),
            Symbol::new(symbol),
            ProviderId::new("alpaca"),
            seq,
            EventPayload::Trade(TradePayload {
                price: Decimal::new(100, 0),
                size: Decimal::ONE,
                aggressor: Aggressor::Buy,
                trade_id: None,
                venue_mic: None,
                conditions: None,
            }),
        );
        serde_json::to_string(&event).unwrap()
    }

    #[test]
    fn replays_every_well_formed_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", trade_line("SPY", 1)).unwrap();
        writeln!(file, "{}", trade_line("SPY", 2)).unwrap();

        let publisher = RecordingPublisher { accept: true, events: Mutex::new(Vec::new()) };
        let summary = replay_file(&path, &publisher).unwrap();
        assert_eq!(summary.read, 2);
        assert_eq!(summary.published, 2);
        assert_eq!(publisher.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", trade_line("SPY", 1)).unwrap();
        writeln!(file, "not json").unwrap();

        let publisher = RecordingPublisher { accept: true, events: Mutex::new(Vec::new()) };
        let summary = replay_file(&path, &publisher).unwrap();
        assert_eq!(summary.read, 2);
        assert_eq!(summary.published, 1);
        assert_eq!(summary.malformed, 1);
    }

    #[test]
    fn rejected_publishes_count_as_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", trade_line("SPY", 1)).unwrap();

        let publisher = RecordingPublisher { accept: false, events: Mutex::new(Vec::new()) };
        let summary = replay_file(&path, &publisher).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.published, 0);
    }
}
