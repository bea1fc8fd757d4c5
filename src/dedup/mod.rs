//! Persistent at-most-once identity cache (§4.3).
//!
//! In-memory lookups are served by a sharded concurrent map (`dashmap`, same
//! crate the teacher uses for its order books); durability is an
//! append-only journal of `key\tcreated_at_millis` lines, rewritten in full
//! on `compact()`.

use crate::config::DedupConfig;
use crate::core_types::ProviderId;
use crate::error::{CoreError, Result};
use crate::event::MarketEvent;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Build the composite dedup key for an event per §4.3.
pub fn dedup_key(event: &MarketEvent) -> String {
    let prefix = format!(
        "{}:{}:{}:",
        event.source,
        event.effective_symbol(),
        event.event_type()
    );
    let identity = event.payload.dedup_identity(event.timestamp, event.sequence);
    format!("{prefix}{identity}")
}

struct Entry {
    created_at_millis: u64,
}

pub struct DedupLedger {
    ledger_path: PathBuf,
    ttl_millis: u64,
    entries: DashMap<String, Entry>,
    journal: std::sync::Mutex<File>,
}

impl DedupLedger {
    pub fn open(config: &DedupConfig) -> Result<Self> {
        if let Some(parent) = config.ledger_path.parent() {
            fs::create_dir_all(parent).map_err(CoreError::Io)?;
        }
        let entries = DashMap::new();
        if let Ok(file) = File::open(&config.ledger_path) {
            for line in BufReader::new(file).lines() {
                let line = line.map_err(CoreError::Io)?;
                if let Some((key, ts)) = line.split_once('\t') {
                    if let Ok(created_at_millis) = ts.parse::<u64>() {
                        entries.insert(key.to_string(), Entry { created_at_millis });
                    }
                }
            }
        }
        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.ledger_path)
            .map_err(CoreError::Io)?;
        Ok(Self {
            ledger_path: config.ledger_path.clone(),
            ttl_millis: config.ttl.as_millis() as u64,
            entries,
            journal: std::sync::Mutex::new(journal),
        })
    }

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as u64
    }

    /// Insert the key if unseen (or expired) and return `false`; return
    /// `true` if a live entry already exists. Uses `DashMap::entry` so the
    /// shard lock is held across the check and the insert — two callers
    /// racing on the same never-seen key cannot both observe it absent.
    pub fn is_duplicate(&self, event: &MarketEvent) -> Result<bool> {
        let key = dedup_key(event);
        let now = Self::now_millis();

        let is_duplicate = match self.entries.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                if now.saturating_sub(occupied.get().created_at_millis) < self.ttl_millis {
                    true
                } else {
                    occupied.insert(Entry { created_at_millis: now });
                    false
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry { created_at_millis: now });
                false
            }
        };

        if is_duplicate {
            return Ok(true);
        }

        let mut journal = self.journal.lock().unwrap();
        writeln!(journal, "{key}\t{now}").map_err(CoreError::Io)?;
        Ok(false)
    }

    /// Flush pending journal appends to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.journal.lock().unwrap().sync_data().map_err(CoreError::Io)
    }

    /// Rewrite the journal keeping only unexpired entries. Safe against
    /// concurrent `is_duplicate` appends because the in-memory map, not the
    /// file, is the source of truth for compaction's contents — entries
    /// added mid-compaction are simply included in the next compaction.
    pub fn compact(&self) -> Result<()> {
        let now = Self::now_millis();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.created_at_millis) < self.ttl_millis);

        let tmp_path = self.ledger_path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path).map_err(CoreError::Io)?;
            for entry in self.entries.iter() {
                writeln!(tmp, "{}\t{}", entry.key(), entry.value().created_at_millis)
                    .map_err(CoreError::Io)?;
            }
            tmp.sync_data().map_err(CoreError::Io)?;
        }
        fs::rename(&tmp_path, &self.ledger_path).map_err(CoreError::Io)?;

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)
            .map_err(CoreError::Io)?;
        *self.journal.lock().unwrap() = journal;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Placeholder kept for call sites that need a provider-scoped default path
/// before a real `DedupConfig` is wired in (tests, examples).
pub fn default_ledger_path_for(provider: &ProviderId) -> PathBuf {
    PathBuf::from("./data/_dedup").join(format!("{provider}.log"))
}
