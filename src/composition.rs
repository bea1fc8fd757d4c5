//! Composition layer (§6 "Runtime DI container -> explicit construction",
//! Design Notes §9): wires collectors, the publisher, the pipeline, and
//! sink/WAL together by hand. No runtime DI container — a caller builds
//! `CoreOptions`, hands it to [`run`], then drives the returned [`Core`].

use crate::backfill::{BackfillCoordinator, BackfillJob, GapDetector};
use crate::collectors::{BboState, Publisher, SequenceAllocator};
use crate::config::CoreOptions;
use crate::core_types::{ProviderId, Symbol};
use crate::dedup::DedupLedger;
use crate::error::Result;
use crate::event::MarketEvent;
use crate::failover::FailoverController;
use crate::pipeline::audit::DropAuditTrail;
use crate::pipeline::EventPipeline;
use crate::providers::ProviderRegistry;
use crate::rate_limit::RateLimiter;
use crate::storage::{JsonlSink, Sink};
use crate::wal::Wal;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Publishes through the dedup ledger and the event pipeline, the one path
/// every collector, the replay module, and the backfill coordinator share
/// (§4.5: "all publishing through one Publisher abstraction").
pub struct PipelinePublisher {
    pipeline: Arc<EventPipeline>,
    dedup: Arc<DedupLedger>,
}

impl Publisher for PipelinePublisher {
    fn publish(&self, event: MarketEvent) -> bool {
        if let Err(err) = event.validate() {
            tracing::warn!(target: "ingest", symbol = %event.symbol, error = %err, "rejected invalid event");
            return false;
        }
        match self.dedup.is_duplicate(&event) {
            Ok(true) => false,
            Ok(false) => self.pipeline.try_publish(event),
            Err(err) => {
                tracing::error!(target: "ingest", error = %err, "dedup ledger lookup failed");
                self.pipeline.try_publish(event)
            }
        }
    }
}

/// Checks whether at least one record already exists for `(symbol, date)`
/// by probing the canonical on-disk trade-partition path, the common case
/// for backfilled data (§4.9 gap detection).
struct SinkGapDetector {
    data_root: PathBuf,
    compressed: bool,
}

impl GapDetector for SinkGapDetector {
    fn has_data(&self, symbol: &Symbol, date: NaiveDate) -> bool {
        let mut path = self.data_root.join(symbol.as_str()).join("trade");
        path.push(format!("{date}.jsonl"));
        if self.compressed {
            path.set_extension("jsonl.gz");
        }
        path.exists()
    }
}

/// The wired-together runtime: pipeline, dedup ledger, provider registry,
/// failover controller, per-provider rate limiters, and the backfill
/// coordinator. Owns everything needed to ingest, backfill, and replay.
pub struct Core {
    pipeline: Arc<EventPipeline>,
    dedup: Arc<DedupLedger>,
    pub registry: ProviderRegistry,
    pub failover: Arc<FailoverController>,
    rate_limiters: DashMap<ProviderId, Arc<RateLimiter>>,
    pub sequence_allocator: Arc<SequenceAllocator>,
    pub bbo_state: Arc<BboState>,
    options: CoreOptions,
    cancellation: CancellationToken,
}

/// Build the durability stack (WAL, sink, dedup ledger, pipeline) per
/// `options` and return a [`Core`] ready for provider registration. Mirrors
/// the teacher's explicit `MatchingEngine::new` wiring rather than a
/// container resolving dependencies by type.
pub async fn run(options: CoreOptions) -> Result<Core> {
    let normalized_symbols = options.normalized_symbols();
    tracing::info!(target: "ingest", symbols = ?normalized_symbols, data_root = %options.data_root.display(), "starting core");

    let wal = Wal::initialize(&options.wal)?;

    let sink: Box<dyn Sink> = Box::new(JsonlSink::new(
        options.sink.data_root.clone(),
        options.sink.naming_policy,
        options.sink.date_partition,
        options.sink.compress,
    ));

    let dedup = Arc::new(DedupLedger::open(&options.dedup)?);

    let audit = DropAuditTrail::open(&options.data_root)?;
    let pipeline = Arc::new(EventPipeline::start(options.pipeline.clone(), wal, sink, audit).await?);

    let failover = Arc::new(FailoverController::new(&options.failover));

    Ok(Core {
        pipeline,
        dedup,
        registry: ProviderRegistry::new(),
        failover,
        rate_limiters: DashMap::new(),
        sequence_allocator: Arc::new(SequenceAllocator::new()),
        bbo_state: Arc::new(BboState::new()),
        options,
        cancellation: CancellationToken::new(),
    })
}

impl Core {
    /// The single publishing seam handed to collectors, the backfill
    /// coordinator, and the replay module.
    pub fn publisher(&self) -> Arc<dyn Publisher> {
        Arc::new(PipelinePublisher {
            pipeline: self.pipeline.clone(),
            dedup: self.dedup.clone(),
        })
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Lazily creates (or returns the existing) rate limiter for a
    /// provider, one singleton per provider id (§4.8, §5).
    pub fn rate_limiter(&self, provider: &ProviderId) -> Arc<RateLimiter> {
        self.rate_limiters
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(RateLimiter::new(self.options.rate_limit.clone())))
            .clone()
    }

    pub fn pipeline_metrics(&self) -> &crate::pipeline::metrics::PipelineMetrics {
        self.pipeline.metrics()
    }

    pub fn queue_len(&self) -> usize {
        self.pipeline.queue_len()
    }

    /// Runs one backfill job end-to-end, persisting state under
    /// `{dataRoot}/ingestion-jobs/` (§4.9, §6).
    pub async fn run_backfill(
        &self,
        job_id: impl Into<String>,
        symbols: Vec<Symbol>,
        from: NaiveDate,
        to: NaiveDate,
        preferred_provider: Option<ProviderId>,
    ) -> Result<BackfillJob> {
        let jobs_dir = crate::backfill::default_jobs_dir(&self.options.data_root);
        let gap_detector = Arc::new(SinkGapDetector {
            data_root: self.options.sink.data_root.clone(),
            compressed: self.options.sink.compress,
        });
        let coordinator = BackfillCoordinator::new(
            self.options.backfill.clone(),
            jobs_dir,
            Arc::new(self.registry.clone()),
            gap_detector,
            self.publisher(),
        );
        let job = coordinator.load_or_create_job(job_id, symbols, from, to, preferred_provider)?;
        coordinator.run(job, self.cancellation()).await
    }

    /// Forwards a provider connection health event to the failover
    /// controller for `source` and returns the resulting action, if any
    /// (§4.7). The composition layer's own provider-driver task is expected
    /// to call this from its health-event loop.
    pub fn report_health(
        &self,
        source: &crate::providers::DataSourceKind,
        event: &crate::providers::ConnectionHealth,
    ) -> crate::failover::FailoverAction {
        self.failover.on_health_event(source, event)
    }

    /// Writes `{dataRoot}/_status/status.json` (§6).
    pub fn write_status(&self) -> Result<()> {
        crate::status::write(&self.options.data_root, self.pipeline.metrics(), self.pipeline.queue_len())
    }

    /// Bounded graceful shutdown: cancels backfill/rate-limit waiters, then
    /// disposes the pipeline (flushing sink + WAL) once this is the last
    /// outstanding reference — collectors and provider tasks must have
    /// dropped their `Arc<dyn Publisher>` clones first.
    pub async fn shutdown(self) -> Result<()> {
        self.cancellation.cancel();
        match Arc::try_unwrap(self.pipeline) {
            Ok(pipeline) => pipeline.dispose().await,
            Err(still_shared) => {
                tracing::warn!(
                    target: "ingest",
                    refs = Arc::strong_count(&still_shared),
                    "pipeline still referenced at shutdown; disposing via forced wait is not possible, leaking the handle"
                );
                Ok(())
            }
        }
    }
}
