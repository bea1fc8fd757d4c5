//! Event pipeline (§4.4): bounded channel, batching consumer, WAL-backed
//! durability, periodic flush, and crash recovery.

pub mod audit;
pub mod channel;
pub mod metrics;

use crate::config::PipelineConfig;
use crate::error::{CoreError, Result};
use crate::event::MarketEvent;
use crate::storage::Sink;
use crate::wal::Wal;
use audit::DropAuditTrail;
use channel::{BoundedChannel, PushOutcome};
use metrics::PipelineMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Core {
    wal: Wal,
    sink: Box<dyn Sink>,
}

/// An event queued for the consumer. `wal_seq` is set when the async
/// `publish` path already wrote the event to the WAL ahead of queuing, so
/// the consumer reuses that sequence instead of appending a second time.
struct QueuedEvent {
    event: MarketEvent,
    wal_seq: Option<u64>,
}

/// Owns the channel, consumer task, flusher task, WAL, sink, and audit
/// trail for one ingestion run. Producers hold only a cheap clone of the
/// channel handle and a reference to this struct's publish methods.
pub struct EventPipeline {
    channel: BoundedChannel<QueuedEvent>,
    core: Arc<Mutex<Core>>,
    audit: Arc<DropAuditTrail>,
    metrics: Arc<PipelineMetrics>,
    config: PipelineConfig,
    cancellation: CancellationToken,
    consumer_handle: Option<JoinHandle<()>>,
    flusher_handle: Option<JoinHandle<()>>,
}

fn encode_event(event: &MarketEvent) -> Result<Vec<u8>> {
    bincode::serialize(event).map_err(|e| CoreError::Durability(e.to_string()))
}

fn decode_event(bytes: &[u8]) -> Result<MarketEvent> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Durability(e.to_string()))
}

impl EventPipeline {
    /// Build the pipeline, run `recover()` to replay any uncommitted WAL
    /// records into the sink, then spawn the consumer and flusher tasks.
    pub async fn start(
        config: PipelineConfig,
        mut wal: Wal,
        mut sink: Box<dyn Sink>,
        audit: DropAuditTrail,
    ) -> Result<Self> {
        let metrics = Arc::new(PipelineMetrics::default());
        let recovered = recover(&mut wal, &mut sink)?;
        metrics.record_recovered(recovered as u64);

        let channel = BoundedChannel::new(config.channel_capacity, config.drop_policy);
        let core = Arc::new(Mutex::new(Core { wal, sink }));
        let audit = Arc::new(audit);
        let cancellation = CancellationToken::new();

        let consumer_handle = spawn_consumer(
            channel.clone(),
            core.clone(),
            audit.clone(),
            metrics.clone(),
            config.clone(),
            cancellation.clone(),
        );
        let flusher_handle = spawn_flusher(
            core.clone(),
            config.flush_interval,
            cancellation.clone(),
        );

        Ok(Self {
            channel,
            core,
            audit,
            metrics,
            config,
            cancellation,
            consumer_handle: Some(consumer_handle),
            flusher_handle: Some(flusher_handle),
        })
    }

    /// Non-blocking publish (§4.4). Returns `false` if the event was
    /// dropped under `DropNewest`; a `DropOldest` eviction still returns
    /// `true` for the new event and audits the evicted one.
    pub fn try_publish(&self, event: MarketEvent) -> bool {
        self.metrics.record_published();
        let queued = QueuedEvent {
            event,
            wal_seq: None,
        };
        match self.channel.try_push(queued) {
            PushOutcome::Accepted => true,
            PushOutcome::EvictedOldest(evicted) => {
                self.audit_drop(&evicted.event, "backpressure_queue_full");
                true
            }
            PushOutcome::RejectedNewest(rejected) => {
                self.audit_drop(&rejected.event, "backpressure_queue_full");
                false
            }
        }
    }

    /// Suspending publish: writes the event to the WAL before queuing, so
    /// async producers get end-to-end durability even if the process dies
    /// before the consumer drains the channel (§4.4). The consumer will see
    /// `wal_seq` already populated and skip re-appending it.
    pub async fn publish(&self, event: MarketEvent) -> Result<bool> {
        let wal_seq = {
            let mut core = self.core.lock().await;
            let payload = encode_event(&event)?;
            match core.wal.append(&payload) {
                Ok(seq) => seq,
                Err(err) => {
                    self.audit_drop(&event, "wal_failure");
                    return Err(err);
                }
            }
        };
        self.metrics.record_published();
        let queued = QueuedEvent {
            event,
            wal_seq: Some(wal_seq),
        };
        match self.channel.push(queued).await {
            PushOutcome::Accepted => Ok(true),
            PushOutcome::EvictedOldest(evicted) => {
                self.audit_drop(&evicted.event, "backpressure_queue_full");
                Ok(true)
            }
            PushOutcome::RejectedNewest(rejected) => {
                self.audit_drop(&rejected.event, "backpressure_queue_full");
                Ok(false)
            }
        }
    }

    fn audit_drop(&self, event: &MarketEvent, reason: &str) {
        self.metrics.record_dropped(1);
        if let Err(err) = self.audit.record(
            event.timestamp,
            event.event_type(),
            &event.symbol,
            event.sequence,
            &event.source,
            reason,
        ) {
            tracing::error!(target: "ingest", error = %err, "failed to write drop audit record");
        }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn queue_len(&self) -> usize {
        self.channel.len()
    }

    /// Close the channel to new writes, wait for the consumer to finish its
    /// current batch within `final_flush_timeout`, then dispose sink/WAL
    /// and audit trail (§4.4 Cancellation).
    pub async fn dispose(mut self) -> Result<()> {
        self.channel.close();
        self.cancellation.cancel();

        if let Some(handle) = self.consumer_handle.take() {
            if tokio::time::timeout(self.config.final_flush_timeout, handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    target: "ingest",
                    timeout_secs = self.config.final_flush_timeout.as_secs(),
                    "consumer did not finish within the final flush timeout"
                );
                let remaining = self.channel.pop_batch(usize::MAX);
                for queued in &remaining {
                    self.audit_drop(&queued.event, "shutdown_timeout");
                }
            }
        }
        if let Some(handle) = self.flusher_handle.take() {
            let _ = handle.await;
        }

        let mut core = self.core.lock().await;
        core.sink.dispose()?;
        Ok(())
    }
}

/// Replay uncommitted WAL records into the sink, flush, commit, and
/// truncate. Runs synchronously before the consumer task starts (§4.4
/// Recover).
fn recover(wal: &mut Wal, sink: &mut Box<dyn Sink>) -> Result<usize> {
    let uncommitted = wal.get_uncommitted_records()?;
    if uncommitted.is_empty() {
        return Ok(0);
    }
    let mut max_seq = wal.last_committed();
    for record in &uncommitted {
        let event = decode_event(&record.payload)?;
        sink.append(&event)?;
        max_seq = max_seq.max(record.sequence);
    }
    sink.flush()?;
    wal.commit(max_seq)?;
    wal.truncate(max_seq)?;
    tracing::info!(target: "ingest", count = uncommitted.len(), "replayed uncommitted WAL records");
    Ok(uncommitted.len())
}

fn spawn_consumer(
    channel: BoundedChannel<QueuedEvent>,
    core: Arc<Mutex<Core>>,
    audit: Arc<DropAuditTrail>,
    metrics: Arc<PipelineMetrics>,
    config: PipelineConfig,
    cancellation: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let batch = tokio::select! {
                _ = cancellation.cancelled() => channel.pop_batch(config.batch_size),
                batch = channel.pop_batch_wait(config.batch_size) => batch,
            };
            if batch.is_empty() {
                if channel.is_closed() {
                    return;
                }
                continue;
            }

            let started_at = Instant::now();
            let mut core_guard = core.lock().await;
            let mut max_seq = core_guard.wal.last_committed();
            let mut batch_ok = true;

            for queued in &batch {
                let event = &queued.event;
                let wal_seq = if let Some(seq) = queued.wal_seq {
                    seq
                } else {
                    let payload = match encode_event(event) {
                        Ok(p) => p,
                        Err(err) => {
                            tracing::error!(target: "ingest", error = %err, "failed to encode event for WAL");
                            batch_ok = false;
                            break;
                        }
                    };
                    match core_guard.wal.append(&payload) {
                        Ok(seq) => seq,
                        Err(err) => {
                            tracing::error!(target: "ingest", error = %err, "WAL append failed");
                            drop(core_guard);
                            audit_one(&audit, &metrics, event, "wal_failure");
                            batch_ok = false;
                            core_guard = core.lock().await;
                            continue;
                        }
                    }
                };
                max_seq = max_seq.max(wal_seq);
                if let Err(err) = core_guard.sink.append(event) {
                    tracing::error!(target: "ingest", error = %err, "sink append failed, batch abandoned");
                    batch_ok = false;
                    break;
                }
            }

            if batch_ok {
                if let Err(err) = core_guard.sink.flush() {
                    tracing::error!(target: "ingest", error = %err, "sink flush failed");
                } else if let Err(err) = core_guard.wal.commit(max_seq) {
                    tracing::error!(target: "ingest", error = %err, "WAL commit failed");
                } else {
                    metrics.record_consumed(batch.len() as u64, started_at.elapsed().as_micros() as u64);
                }
            }
            drop(core_guard);

            let queue_len = channel.len();
            let utilization = queue_len as f64 / channel.capacity().max(1) as f64;
            metrics.check_watermarks(utilization, config.warn_high_watermark, config.warn_low_watermark);

            if cancellation.is_cancelled() && channel.is_empty() {
                return;
            }
        }
    })
}

fn audit_one(audit: &DropAuditTrail, metrics: &PipelineMetrics, event: &MarketEvent, reason: &str) {
    metrics.record_dropped(1);
    if let Err(err) = audit.record(
        event.timestamp,
        event.event_type(),
        &event.symbol,
        event.sequence,
        &event.source,
        reason,
    ) {
        tracing::error!(target: "ingest", error = %err, "failed to write drop audit record");
    }
}

fn spawn_flusher(
    core: Arc<Mutex<Core>>,
    flush_interval: Duration,
    cancellation: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_interval);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = ticker.tick() => {
                    let mut core = core.lock().await;
                    if let Err(err) = core.sink.flush() {
                        tracing::error!(target: "ingest", error = %err, "periodic sink flush failed");
                        continue;
                    }
                    let last_committed = core.wal.last_committed();
                    if let Err(err) = core.wal.truncate(last_committed) {
                        tracing::error!(target: "ingest", error = %err, "periodic WAL truncate failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DropPolicy, WalConfig};
    use crate::event::{Aggressor, EventPayload, TradePayload};
    use crate::storage::JsonlSink;
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    fn trade_event(sequence: u64) -> MarketEvent {
        MarketEvent::new(
            "2024-01-02T14:30:00Z".parse().unwrap(),
            "SPY".into(),
            "alpaca".into(),
            sequence,
            EventPayload::Trade(TradePayload {
                price: Decimal::new(50012, 2),
                size: Decimal::new(100, 0),
                aggressor: Aggressor::Buy,
                trade_id: None,
                venue_mic: None,
                conditions: None,
            }),
        )
    }

    #[tokio::test]
    async fn publish_then_dispose_persists_event() {
        let dir = tempdir().unwrap();
        let wal_config = WalConfig {
            wal_dir: dir.path().join("wal"),
            sync_mode: crate::config::SyncMode::PerRecordSync,
            max_segment_bytes: 1024 * 1024,
        };
        let wal = Wal::initialize(&wal_config).unwrap();
        let sink: Box<dyn Sink> = Box::new(JsonlSink::new(
            dir.path().join("data"),
            crate::config::NamingPolicy::Canonical,
            crate::config::DatePartition::Daily,
            false,
        ));
        let audit = DropAuditTrail::open(dir.path()).unwrap();
        let mut config = PipelineConfig::default();
        config.flush_interval = Duration::from_millis(20);
        config.drop_policy = DropPolicy::DropOldest;

        let pipeline = EventPipeline::start(config, wal, sink, audit).await.unwrap();
        assert!(pipeline.try_publish(trade_event(1)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        pipeline.dispose().await.unwrap();

        let path = dir.path().join("data/SPY/trade/2024-01-02.jsonl");
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn recover_replays_uncommitted_records_into_sink() {
        let dir = tempdir().unwrap();
        let wal_config = WalConfig {
            wal_dir: dir.path().join("wal"),
            sync_mode: crate::config::SyncMode::PerRecordSync,
            max_segment_bytes: 1024 * 1024,
        };
        {
            let mut wal = Wal::initialize(&wal_config).unwrap();
            let payload = encode_event(&trade_event(1)).unwrap();
            wal.append(&payload).unwrap();
            // No commit(): this record is uncommitted and must replay.
        }

        let mut wal = Wal::initialize(&wal_config).unwrap();
        let mut sink: Box<dyn Sink> = Box::new(JsonlSink::new(
            dir.path().join("data"),
            crate::config::NamingPolicy::Canonical,
            crate::config::DatePartition::Daily,
            false,
        ));
        let recovered = recover(&mut wal, &mut sink).unwrap();
        assert_eq!(recovered, 1);
        // The WAL's own sequence namespace is distinct from the replayed
        // MarketEvent's `sequence` field; the first WAL record is seq 0.
        assert_eq!(wal.last_committed(), 0);

        let path = dir.path().join("data/SPY/trade/2024-01-02.jsonl");
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
