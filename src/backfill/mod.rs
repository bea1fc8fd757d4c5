//! Backfill coordinator (§4.9): detects gaps in stored data, dispatches
//! requests to historical providers honoring rate limits, persists progress
//! for resumability, and emits completed bars through the publisher.
//!
//! Grounded on the teacher's job-queue/worker-pool pattern
//! (`matching_wal` recovery bookkeeping plus the engine's bounded worker
//! pools), generalized to a semaphore-bounded async pool over
//! `(symbol, date)` requests instead of order-book operations.

mod job;

pub use job::{BackfillJob, JobState, SymbolProgress};

use crate::collectors::Publisher;
use crate::config::BackfillConfig;
use crate::core_types::{ProviderId, Symbol};
use crate::error::{CoreError, Result};
use crate::providers::ProviderRegistry;
use chrono::NaiveDate;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Decides whether the storage layout already holds at least one record for
/// `(symbol, date)`. Implemented by the composition layer against the real
/// sink/naming policy; kept abstract here so this module has no direct
/// dependency on a specific `Sink` implementation.
pub trait GapDetector: Send + Sync {
    fn has_data(&self, symbol: &Symbol, date: NaiveDate) -> bool;
}

/// Drives gap detection, provider selection, retries, and checkpointed
/// resume for one job's symbol × date matrix.
pub struct BackfillCoordinator {
    config: BackfillConfig,
    jobs_dir: PathBuf,
    registry: Arc<ProviderRegistry>,
    gap_detector: Arc<dyn GapDetector>,
    publisher: Arc<dyn Publisher>,
}

impl BackfillCoordinator {
    pub fn new(
        config: BackfillConfig,
        jobs_dir: impl Into<PathBuf>,
        registry: Arc<ProviderRegistry>,
        gap_detector: Arc<dyn GapDetector>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            config,
            jobs_dir: jobs_dir.into(),
            registry,
            gap_detector,
            publisher,
        }
    }

    fn job_path(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(format!("job_{job_id}.json"))
    }

    fn load_job(&self, job_id: &str) -> Result<Option<BackfillJob>> {
        let path = self.job_path(job_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(CoreError::Io)?;
        let job = serde_json::from_slice(&bytes).map_err(CoreError::Serde)?;
        Ok(Some(job))
    }

    fn persist_job(&self, job: &BackfillJob) -> Result<()> {
        std::fs::create_dir_all(&self.jobs_dir).map_err(CoreError::Io)?;
        let path = self.job_path(&job.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(job).map_err(CoreError::Serde)?;
        std::fs::write(&tmp, bytes).map_err(CoreError::Io)?;
        std::fs::rename(&tmp, &path).map_err(CoreError::Io)?;
        Ok(())
    }

    /// Loads an existing job by id, or creates and persists a fresh `Draft`
    /// job covering `symbols x [from, to]`.
    pub fn load_or_create_job(
        &self,
        job_id: impl Into<String>,
        symbols: Vec<Symbol>,
        from: NaiveDate,
        to: NaiveDate,
        preferred_provider: Option<ProviderId>,
    ) -> Result<BackfillJob> {
        let job_id = job_id.into();
        if let Some(job) = self.load_job(&job_id)? {
            return Ok(job);
        }
        let job = BackfillJob::new(job_id, symbols, from, to, preferred_provider);
        self.persist_job(&job)?;
        Ok(job)
    }

    /// Runs one job end-to-end: gap detection, dispatch through the
    /// semaphore-bounded pool, checkpointed persistence, and the terminal
    /// completion rule (§4.9). Resumable: a prior `Paused`/`Failed` job
    /// skips `(symbol, date)` pairs already in `filled_dates`.
    pub async fn run(&self, mut job: BackfillJob, cancel: CancellationToken) -> Result<BackfillJob> {
        job.prepare_to_run().map_err(CoreError::Configuration)?;
        self.persist_job(&job)?;

        let pending = self.detect_gaps(&job);
        if pending.is_empty() {
            job.finalize();
            self.persist_job(&job)?;
            return Ok(job);
        }

        let pool = Arc::new(Semaphore::new(self.config.max_in_flight));
        let per_provider = Arc::new(dashmap::DashMap::<ProviderId, Arc<Semaphore>>::new());

        for (symbol, date) in pending {
            if cancel.is_cancelled() {
                job.transition(JobState::Paused);
                self.persist_job(&job)?;
                return Ok(job);
            }

            let outcome = self.fetch_one(&symbol, date, job.preferred_provider.as_ref(), &pool, &per_provider, &cancel).await;
            let progress = job.progress_mut(&symbol);
            match outcome {
                Ok(count) => {
                    progress.processed += count;
                    progress.last_committed_date = Some(date);
                    job.filled_dates.insert(format!("{symbol}:{date}"));
                }
                Err(FetchOutcome::NotApplicable) => {
                    progress.not_applicable.insert(date);
                }
                Err(FetchOutcome::Failed(detail)) => {
                    progress.last_error = Some(detail);
                    progress.retry_count += 1;
                }
            }
            job.checkpoint(symbol.clone(), date);
            self.persist_job(&job)?;
        }

        job.finalize();
        self.persist_job(&job)?;
        Ok(job)
    }

    fn detect_gaps(&self, job: &BackfillJob) -> Vec<(Symbol, NaiveDate)> {
        let mut missing = Vec::new();
        for symbol in &job.symbols {
            let mut date = job.from_date;
            while date <= job.to_date {
                let key = format!("{symbol}:{date}");
                if !job.filled_dates.contains(&key) && !self.gap_detector.has_data(symbol, date) {
                    missing.push((symbol.clone(), date));
                }
                date = date.succ_opt().expect("date range bounded well below NaiveDate::MAX");
            }
        }
        missing
    }

    async fn fetch_one(
        &self,
        symbol: &Symbol,
        date: NaiveDate,
        preferred: Option<&ProviderId>,
        pool: &Arc<Semaphore>,
        per_provider: &Arc<dashmap::DashMap<ProviderId, Arc<Semaphore>>>,
        cancel: &CancellationToken,
    ) -> std::result::Result<usize, FetchOutcome> {
        let providers = self.select_providers(preferred);
        if providers.is_empty() {
            return Err(FetchOutcome::Failed("no historical providers registered".into()));
        }

        let mut last_error = None;
        for provider_id in providers {
            let Some(provider) = self.registry.historical(&provider_id) else {
                continue;
            };
            let provider_gate = per_provider
                .entry(provider_id.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_in_flight_per_provider)))
                .clone();

            for attempt in 0..=self.config.max_retries {
                if cancel.is_cancelled() {
                    return Err(FetchOutcome::Failed("cancelled".into()));
                }
                let _global = pool.acquire().await.expect("semaphore not closed");
                let _provider_permit = provider_gate.acquire().await.expect("semaphore not closed");

                match provider.fetch_bars(symbol, date).await {
                    Ok(bars) => {
                        let mut count = 0;
                        for bar in bars {
                            if self.publisher.publish(bar.event) {
                                count += 1;
                            }
                        }
                        return Ok(count);
                    }
                    Err(err) => {
                        if is_not_applicable(&err) {
                            return Err(FetchOutcome::NotApplicable);
                        }
                        if !err.is_retryable() || attempt == self.config.max_retries {
                            last_error = Some(err.to_string());
                            break;
                        }
                        let delay = backoff_with_jitter(self.config.base_backoff, self.config.max_backoff, attempt);
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(FetchOutcome::Failed("cancelled".into())),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        last_error = Some(err.to_string());
                    }
                }
            }
        }

        Err(FetchOutcome::Failed(last_error.unwrap_or_else(|| "exhausted all providers".into())))
    }

    fn select_providers(&self, preferred: Option<&ProviderId>) -> Vec<ProviderId> {
        if let Some(p) = preferred {
            if self.registry.historical(p).is_some() {
                return vec![p.clone()];
            }
        }
        let mut providers: Vec<_> = self
            .registry
            .historical_providers()
            .map(|(id, provider)| (id.clone(), provider.priority()))
            .collect();
        providers.sort_by_key(|(_, priority)| *priority);
        providers.into_iter().map(|(id, _)| id).collect()
    }
}

enum FetchOutcome {
    NotApplicable,
    Failed(String),
}

fn is_not_applicable(err: &CoreError) -> bool {
    matches!(err, CoreError::NoData { .. })
        || matches!(err, CoreError::AuthFailure { .. })
        || matches!(err, CoreError::Configuration(msg) if msg.contains("invalid-symbol"))
}

fn backoff_with_jitter(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX)).min(max);
    let jitter_ms = rand::thread_rng().gen_range(0..=(exp.as_millis() as u64 / 4 + 1));
    exp + Duration::from_millis(jitter_ms)
}

pub fn default_jobs_dir(data_root: &Path) -> PathBuf {
    data_root.join("ingestion-jobs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::ProviderId;
    use crate::event::{EventPayload, MarketEvent, TradePayload};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct AlwaysMissing;
    impl GapDetector for AlwaysMissing {
        fn has_data(&self, _symbol: &Symbol, _date: NaiveDate) -> bool {
            false
        }
    }

    struct RecordingPublisher {
        published: StdMutex<Vec<MarketEvent>>,
    }
    impl Publisher for RecordingPublisher {
        fn publish(&self, event: MarketEvent) -> bool {
            self.published.lock().unwrap().push(event);
            true
        }
    }

    struct StubHistorical {
        id: ProviderId,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl crate::providers::HistoricalProvider for StubHistorical {
        fn provider_id(&self) -> &ProviderId {
            &self.id
        }

        async fn fetch_bars(
            &self,
            symbol: &Symbol,
            date: NaiveDate,
        ) -> Result<Vec<crate::providers::HistoricalBar>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let event = MarketEvent::new(
                Utc::now(),
                symbol.clone(),
                self.id.clone(),
                1,
                EventPayload::Trade(TradePayload {
                    price: Decimal::new(1000, 2),
                    size: Decimal::new(1, 0),
                    aggressor: crate::event::Aggressor::Unknown,
                    trade_id: Some(format!("{symbol}-{date}")),
                    venue_mic: None,
                    conditions: None,
                }),
            );
            Ok(vec![crate::providers::HistoricalBar { symbol: symbol.clone(), event }])
        }
    }

    fn jobs_dir() -> PathBuf {
        std::env::temp_dir().join(format!("aquifer-backfill-test-{}", uuid_like()))
    }

    fn uuid_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    #[tokio::test]
    async fn completes_a_small_job_and_publishes_bars() {
        let dir = jobs_dir();
        let mut registry = ProviderRegistry::new();
        let provider = Arc::new(StubHistorical { id: ProviderId::new("stub"), calls: AtomicUsize::new(0) });
        registry.register_historical(ProviderId::new("stub"), provider.clone());

        let publisher = Arc::new(RecordingPublisher { published: StdMutex::new(Vec::new()) });
        let coordinator = BackfillCoordinator::new(
            BackfillConfig { max_retries: 1, base_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(5), max_in_flight: 4, max_in_flight_per_provider: 2 },
            dir.clone(),
            Arc::new(registry),
            Arc::new(AlwaysMissing),
            publisher.clone(),
        );

        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let job = coordinator
            .load_or_create_job("t1", vec![Symbol::new("AAPL")], from, to, None)
            .unwrap();
        let job = coordinator.run(job, CancellationToken::new()).await.unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(publisher.published.lock().unwrap().len(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn resumes_skipping_already_filled_dates() {
        let dir = jobs_dir();
        let mut registry = ProviderRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        struct CountingProvider {
            id: ProviderId,
            calls: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl crate::providers::HistoricalProvider for CountingProvider {
            fn provider_id(&self) -> &ProviderId {
                &self.id
            }
            async fn fetch_bars(&self, symbol: &Symbol, date: NaiveDate) -> Result<Vec<crate::providers::HistoricalBar>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let event = MarketEvent::new(
                    Utc::now(),
                    symbol.clone(),
                    self.id.clone(),
                    1,
                    EventPayload::Trade(TradePayload {
                        price: Decimal::new(1, 0),
                        size: Decimal::new(1, 0),
                        aggressor: crate::event::Aggressor::Unknown,
                        trade_id: Some(format!("{symbol}-{date}")),
                        venue_mic: None,
                        conditions: None,
                    }),
                );
                Ok(vec![crate::providers::HistoricalBar { symbol: symbol.clone(), event }])
            }
        }
        registry.register_historical(ProviderId::new("stub"), Arc::new(CountingProvider { id: ProviderId::new("stub"), calls: calls.clone() }));

        let publisher = Arc::new(RecordingPublisher { published: StdMutex::new(Vec::new()) });
        let coordinator = BackfillCoordinator::new(
            BackfillConfig { max_retries: 1, base_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(5), max_in_flight: 4, max_in_flight_per_provider: 2 },
            dir.clone(),
            Arc::new(registry),
            Arc::new(AlwaysMissing),
            publisher,
        );

        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let mut job = coordinator.load_or_create_job("t2", vec![Symbol::new("MSFT")], from, to, None).unwrap();
        job.filled_dates.insert(format!("MSFT:{}", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        job.progress_mut(&Symbol::new("MSFT")).processed = 1;

        let job = coordinator.run(job, CancellationToken::new()).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        let d0 = backoff_with_jitter(base, max, 0);
        let d3 = backoff_with_jitter(base, max, 3);
        assert!(d0 >= base);
        assert!(d3 <= max + Duration::from_millis(300));
    }

    #[test]
    fn no_data_is_not_applicable_and_not_retried() {
        let err = CoreError::NoData {
            provider: ProviderId::new("stub"),
            symbol: Symbol::new("AAPL"),
            date: NaiveDate::from_ymd_opt(2024, 1, 6).unwrap(),
        };
        assert!(is_not_applicable(&err));
        assert!(!err.is_retryable());
    }

    struct NoDataOnWeekends {
        id: ProviderId,
    }
    #[async_trait]
    impl crate::providers::HistoricalProvider for NoDataOnWeekends {
        fn provider_id(&self) -> &ProviderId {
            &self.id
        }
        async fn fetch_bars(&self, symbol: &Symbol, date: NaiveDate) -> Result<Vec<crate::providers::HistoricalBar>> {
            use chrono::Datelike;
            if matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
                return Err(CoreError::NoData { provider: self.id.clone(), symbol: symbol.clone(), date });
            }
            let event = MarketEvent::new(
                Utc::now(),
                symbol.clone(),
                self.id.clone(),
                1,
                EventPayload::Trade(TradePayload {
                    price: Decimal::new(1000, 2),
                    size: Decimal::new(1, 0),
                    aggressor: crate::event::Aggressor::Unknown,
                    trade_id: Some(format!("{symbol}-{date}")),
                    venue_mic: None,
                    conditions: None,
                }),
            );
            Ok(vec![crate::providers::HistoricalBar { symbol: symbol.clone(), event }])
        }
    }

    #[tokio::test]
    async fn weekend_no_data_completes_the_job_instead_of_failing_it() {
        let dir = jobs_dir();
        let mut registry = ProviderRegistry::new();
        registry.register_historical(ProviderId::new("stub"), Arc::new(NoDataOnWeekends { id: ProviderId::new("stub") }));

        let publisher = Arc::new(RecordingPublisher { published: StdMutex::new(Vec::new()) });
        let coordinator = BackfillCoordinator::new(
            BackfillConfig { max_retries: 1, base_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(5), max_in_flight: 4, max_in_flight_per_provider: 2 },
            dir.clone(),
            Arc::new(registry),
            Arc::new(AlwaysMissing),
            publisher,
        );

        // 2024-01-06/07 is a Sat/Sun; spans one trading-week weekend.
        let from = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let job = coordinator.load_or_create_job("t3", vec![Symbol::new("AAPL")], from, to, None).unwrap();
        let job = coordinator.run(job, CancellationToken::new()).await.unwrap();

        assert_eq!(job.state, JobState::Completed);
        let progress = &job.progress[&Symbol::new("AAPL")];
        assert_eq!(progress.not_applicable.len(), 2);
        assert_eq!(progress.processed, 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn a_job_reloaded_in_running_state_resumes_instead_of_panicking() {
        let dir = jobs_dir();
        let mut registry = ProviderRegistry::new();
        let provider = Arc::new(StubHistorical { id: ProviderId::new("stub"), calls: AtomicUsize::new(0) });
        registry.register_historical(ProviderId::new("stub"), provider);

        let publisher = Arc::new(RecordingPublisher { published: StdMutex::new(Vec::new()) });
        let coordinator = BackfillCoordinator::new(
            BackfillConfig { max_retries: 1, base_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(5), max_in_flight: 4, max_in_flight_per_provider: 2 },
            dir.clone(),
            Arc::new(registry),
            Arc::new(AlwaysMissing),
            publisher,
        );

        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut job = coordinator.load_or_create_job("t4", vec![Symbol::new("AAPL")], from, to, None).unwrap();
        // Simulate a crash: the coordinator had transitioned to `Running`
        // and persisted before the process died mid-loop.
        job.transition(JobState::Queued);
        job.transition(JobState::Running);

        let job = coordinator.run(job, CancellationToken::new()).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
