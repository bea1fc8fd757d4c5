//! Configuration structs consumed by the core.
//!
//! Parsing, schema validation, file watching, and environment overlays are
//! explicitly out of scope (§1) — they belong to the CLI/config
//! collaborator. This module defines only the plain structs that
//! collaborator fills in and hands to [`crate::composition::run`], plus
//! sensible `Default` impls for use in tests and examples, the way the
//! teacher keeps `TradingConfig` free of any file-loading logic itself.

use std::path::PathBuf;
use std::time::Duration;

/// How WAL appends are synced to disk (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// fsync after every record. Strongest durability, lowest throughput.
    PerRecordSync,
    /// fsync every `batch_size` records or `max_delay`, whichever first.
    BatchedSync {
        batch_size: usize,
        max_delay: Duration,
    },
    /// No explicit fsync; rely on OS page cache. Waives the durability
    /// guarantee (§4.2 invariants).
    NoSync,
}

impl Default for SyncMode {
    /// The teacher's analogue ships `BatchedSync` as the default, trading
    /// some durability for throughput; see the Open Question in §9 and
    /// DESIGN.md for the tolerable-recovery-window decision.
    fn default() -> Self {
        SyncMode::BatchedSync {
            batch_size: 256,
            max_delay: Duration::from_millis(50),
        }
    }
}

/// Path-naming strategy for the storage sink (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingPolicy {
    Flat,
    BySymbol,
    ByDate,
    ByType,
    BySource,
    ByAssetClass,
    Hierarchical,
    Canonical,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        NamingPolicy::Canonical
    }
}

/// Date-partitioning granularity for the storage sink (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePartition {
    None,
    Daily,
    Hourly,
    Monthly,
}

impl Default for DatePartition {
    fn default() -> Self {
        DatePartition::Daily
    }
}

/// Drop policy applied when the pipeline's bounded channel is full (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPolicy {
    /// `tryPublish` fails; the new event is dropped.
    DropNewest,
    /// The oldest queued event is evicted to make room for the new one.
    DropOldest,
    /// Only meaningful for the async `publish` path: suspend until a slot
    /// frees up.
    Wait,
}

impl Default for DropPolicy {
    fn default() -> Self {
        DropPolicy::DropOldest
    }
}

/// Sink configuration: where files land and how they are named.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub data_root: PathBuf,
    pub naming_policy: NamingPolicy,
    pub date_partition: DatePartition,
    pub compress: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            naming_policy: NamingPolicy::default(),
            date_partition: DatePartition::default(),
            compress: false,
        }
    }
}

/// WAL configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    pub wal_dir: PathBuf,
    pub sync_mode: SyncMode,
    /// Roll to a new WAL segment once the active file exceeds this size.
    pub max_segment_bytes: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            wal_dir: PathBuf::from("./data/_wal"),
            sync_mode: SyncMode::default(),
            max_segment_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Dedup ledger configuration.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub ledger_path: PathBuf,
    pub ttl: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("./data/_dedup/ledger.log"),
            ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Event pipeline configuration (§4.4).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub drop_policy: DropPolicy,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Bounded wait for the consumer to finish its current batch on
    /// `dispose()` (§4.4 Cancellation).
    pub final_flush_timeout: Duration,
    /// Utilization fraction at which a one-shot backpressure warning fires.
    pub warn_high_watermark: f64,
    /// Utilization fraction below which the warning re-arms.
    pub warn_low_watermark: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 4096,
            drop_policy: DropPolicy::default(),
            batch_size: 256,
            flush_interval: Duration::from_secs(5),
            final_flush_timeout: Duration::from_secs(30),
            warn_high_watermark: 0.8,
            warn_low_watermark: 0.5,
        }
    }
}

/// Per-provider sliding-window rate limiter configuration (§4.8).
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub min_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 200,
            window: Duration::from_secs(60),
            min_delay: Duration::from_millis(50),
        }
    }
}

/// Failover controller configuration (§4.7).
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    pub failover_after: Duration,
    pub error_window: Duration,
    pub error_threshold: u32,
    pub recovery_stable: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failover_after: Duration::from_secs(10),
            error_window: Duration::from_secs(60),
            error_threshold: 5,
            recovery_stable: Duration::from_secs(30),
        }
    }
}

/// Backfill coordinator configuration (§4.9).
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on in-flight historical requests across all providers.
    pub max_in_flight: usize,
    /// Upper bound on in-flight requests to a single provider.
    pub max_in_flight_per_provider: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            max_in_flight: 16,
            max_in_flight_per_provider: 4,
        }
    }
}

/// Logging configuration (§2 ambient component), mirroring the teacher's
/// `AppConfig` logging fields: file rotation, JSON vs text layer, and
/// whether module-level tracing is silenced.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_dir: PathBuf,
    pub log_file: String,
    pub rotation: LogRotation,
    pub log_level: String,
    pub use_json: bool,
    pub enable_tracing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./data/_logs"),
            log_file: "aquifer-md.log".to_string(),
            rotation: LogRotation::Daily,
            log_level: "info".to_string(),
            use_json: false,
            enable_tracing: true,
        }
    }
}

/// Operating mode for the `run()` entry, mirroring the CLI surface the
/// config/CLI collaborator parses into this struct (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Headless,
    Web,
    Desktop,
}

/// Top-level command the CLI collaborator selects (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Backfill,
    Replay { replay_path: PathBuf },
}

/// The options struct the core's `run()` entry accepts (§6). The core never
/// parses argv or a config file itself; this is handed in fully formed.
#[derive(Debug, Clone)]
pub struct CoreOptions {
    pub data_root: PathBuf,
    pub mode: RunMode,
    pub command: Command,
    pub symbols: Vec<String>,
    pub sink: SinkConfig,
    pub wal: WalConfig,
    pub dedup: DedupConfig,
    pub pipeline: PipelineConfig,
    pub rate_limit: RateLimitConfig,
    pub failover: FailoverConfig,
    pub backfill: BackfillConfig,
}

/// Default symbol the system auto-populates with when no symbols are
/// configured, per the §8 boundary behavior.
pub const DEFAULT_SYMBOL: &str = "SPY";

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            mode: RunMode::Headless,
            command: Command::Run,
            symbols: Vec::new(),
            sink: SinkConfig::default(),
            wal: WalConfig::default(),
            dedup: DedupConfig::default(),
            pipeline: PipelineConfig::default(),
            rate_limit: RateLimitConfig::default(),
            failover: FailoverConfig::default(),
            backfill: BackfillConfig::default(),
        }
    }
}

impl CoreOptions {
    /// Empty symbol list is auto-populated with a single default symbol and
    /// a warning (§8 boundary behavior).
    pub fn normalized_symbols(&self) -> Vec<String> {
        if self.symbols.is_empty() {
            tracing::warn!(
                target: "ingest",
                default_symbol = DEFAULT_SYMBOL,
                "no symbols configured, falling back to default"
            );
            vec![DEFAULT_SYMBOL.to_string()]
        } else {
            self.symbols.clone()
        }
    }
}
