//! `BackfillJob` data model and state machine (§3): the persisted record
//! that makes a backfill resumable across process restarts.

use crate::core_types::{ProviderId, Symbol};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A job's lifecycle state. Transitions enforced by [`BackfillJob::transition`]:
/// `Draft -> Queued -> Running -> {Paused -> Queued, Completed, Failed -> Queued, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Draft,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Draft, Queued)
                | (Queued, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Queued)
                | (Paused, Cancelled)
                | (Failed, Queued)
                | (Failed, Cancelled)
        )
    }
}

/// Per-symbol progress within a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolProgress {
    pub expected: usize,
    pub processed: usize,
    pub last_committed_date: Option<NaiveDate>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub not_applicable: HashSet<NaiveDate>,
}

/// A checkpoint token: the last `(symbol, date)` pair processed, for
/// resuming mid-job (§3 `checkpointToken`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_symbol: Symbol,
    pub last_date: NaiveDate,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
    pub id: String,
    pub symbols: Vec<Symbol>,
    pub preferred_provider: Option<ProviderId>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub state: JobState,
    pub progress: BTreeMap<Symbol, SymbolProgress>,
    /// `"{symbol}:{date}"` keys already durably stored, consulted by gap
    /// detection before issuing a fetch (§4.9 "Resume").
    pub filled_dates: HashSet<String>,
    pub checkpoint: Option<Checkpoint>,
}

impl BackfillJob {
    pub fn new(
        id: String,
        symbols: Vec<Symbol>,
        from_date: NaiveDate,
        to_date: NaiveDate,
        preferred_provider: Option<ProviderId>,
    ) -> Self {
        let span_days = (to_date - from_date).num_days().max(0) as usize + 1;
        let mut progress = BTreeMap::new();
        for symbol in &symbols {
            progress.insert(
                symbol.clone(),
                SymbolProgress {
                    expected: span_days,
                    ..Default::default()
                },
            );
        }
        Self {
            id,
            symbols,
            preferred_provider,
            from_date,
            to_date,
            state: JobState::Draft,
            progress,
            filled_dates: HashSet::new(),
            checkpoint: None,
        }
    }

    /// Applies a state transition, panicking on an illegal one — job state
    /// mutation is entirely internal to the coordinator, so an illegal
    /// transition is a programming error, not a runtime condition to
    /// recover from.
    pub fn transition(&mut self, next: JobState) {
        assert!(
            self.state.can_transition_to(next),
            "illegal backfill job transition: {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Normalizes a freshly loaded job's state before (re)entering `run()`
    /// (§3 resumability). A job reloaded as `Running` means the process
    /// crashed mid-run before it could persist `Paused`; treat that the
    /// same as a paused resume instead of asserting on a transition a live
    /// job never makes on its own. `Completed`/`Cancelled` are terminal and
    /// rejected rather than normalized.
    pub fn prepare_to_run(&mut self) -> std::result::Result<(), String> {
        match self.state {
            JobState::Completed | JobState::Cancelled => {
                return Err(format!(
                    "job {} is already {:?}, cannot resume",
                    self.id, self.state
                ));
            }
            JobState::Running => self.state = JobState::Paused,
            _ => {}
        }
        if self.state != JobState::Queued {
            self.transition(JobState::Queued);
        }
        self.transition(JobState::Running);
        Ok(())
    }

    pub fn progress_mut(&mut self, symbol: &Symbol) -> &mut SymbolProgress {
        self.progress.entry(symbol.clone()).or_default()
    }

    pub fn checkpoint(&mut self, symbol: Symbol, date: NaiveDate) {
        self.checkpoint = Some(Checkpoint {
            last_symbol: symbol,
            last_date: date,
            captured_at: chrono::Utc::now(),
        });
    }

    /// Whether the job may be resumed: `Paused` or `Failed` with a
    /// checkpoint present (§3).
    pub fn is_resumable(&self) -> bool {
        matches!(self.state, JobState::Paused | JobState::Failed) && self.checkpoint.is_some()
    }

    /// Applies the completion rule (§4.9): `Completed` iff every symbol's
    /// progress accounts for its full expected count (processed plus
    /// not-applicable dates), else `Failed`.
    pub fn finalize(&mut self) {
        let all_done = self
            .progress
            .values()
            .all(|p| p.processed + p.not_applicable.len() >= p.expected);
        if all_done {
            self.transition(JobState::Completed);
        } else {
            self.transition(JobState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> BackfillJob {
        BackfillJob::new(
            "j1".into(),
            vec![Symbol::new("AAPL"), Symbol::new("MSFT")],
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            None,
        )
    }

    #[test]
    fn new_job_seeds_expected_per_symbol() {
        let job = job();
        assert_eq!(job.progress[&Symbol::new("AAPL")].expected, 5);
        assert_eq!(job.state, JobState::Draft);
    }

    #[test]
    fn valid_transition_chain_succeeds() {
        let mut job = job();
        job.transition(JobState::Queued);
        job.transition(JobState::Running);
        job.transition(JobState::Paused);
        job.transition(JobState::Queued);
        job.transition(JobState::Running);
        job.transition(JobState::Completed);
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    #[should_panic(expected = "illegal backfill job transition")]
    fn illegal_transition_panics() {
        let mut job = job();
        job.transition(JobState::Completed);
    }

    #[test]
    fn finalize_completes_only_when_every_symbol_is_fully_accounted() {
        let mut job = job();
        for progress in job.progress.values_mut() {
            progress.processed = progress.expected;
        }
        job.transition(JobState::Queued);
        job.transition(JobState::Running);
        job.finalize();
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn finalize_fails_when_a_symbol_is_short() {
        let mut job = job();
        job.progress.get_mut(&Symbol::new("AAPL")).unwrap().processed = 5;
        job.transition(JobState::Queued);
        job.transition(JobState::Running);
        job.finalize();
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn failed_with_checkpoint_is_resumable() {
        let mut job = job();
        job.transition(JobState::Queued);
        job.transition(JobState::Running);
        job.checkpoint(Symbol::new("AAPL"), job.from_date);
        job.transition(JobState::Failed);
        assert!(job.is_resumable());
    }

    #[test]
    fn reloaded_running_job_resumes_without_panicking() {
        let mut job = job();
        job.transition(JobState::Queued);
        job.transition(JobState::Running);
        // Simulates a process crash mid-run: the job was persisted while
        // still `Running`, never reaching `Paused`.
        job.prepare_to_run().unwrap();
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    fn reloaded_paused_and_failed_jobs_resume() {
        let mut paused = job();
        paused.transition(JobState::Queued);
        paused.transition(JobState::Running);
        paused.transition(JobState::Paused);
        paused.prepare_to_run().unwrap();
        assert_eq!(paused.state, JobState::Running);

        let mut failed = job();
        failed.transition(JobState::Queued);
        failed.transition(JobState::Running);
        failed.transition(JobState::Failed);
        failed.prepare_to_run().unwrap();
        assert_eq!(failed.state, JobState::Running);
    }

    #[test]
    fn completed_and_cancelled_jobs_cannot_be_resumed() {
        let mut completed = job();
        completed.transition(JobState::Queued);
        completed.transition(JobState::Running);
        completed.transition(JobState::Completed);
        assert!(completed.prepare_to_run().is_err());

        let mut cancelled = job();
        cancelled.transition(JobState::Queued);
        cancelled.transition(JobState::Running);
        cancelled.transition(JobState::Cancelled);
        assert!(cancelled.prepare_to_run().is_err());
    }
}
