//! Per-provider sliding-window rate limiter (§4.8), grounded on the pack's
//! `middleware/rate_limit.rs` sliding-window-per-key design, adapted from a
//! per-IP HTTP middleware to a per-provider outbound-request gate with a
//! cancellable suspending wait instead of an immediate allow/reject.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct State {
    /// Timestamps of admitted requests within the current window, oldest
    /// first; entries older than `window` are evicted lazily on access.
    timestamps: VecDeque<Instant>,
    last_request: Option<Instant>,
}

/// A single provider's rate limiter. One instance per provider, held behind
/// a single write lock — no reader/writer split, since admission decisions
/// always mutate state (§5: "Rate limiters are per-provider singletons with
/// a single write lock per limiter").
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                timestamps: VecDeque::new(),
                last_request: None,
            }),
        }
    }

    fn evict_expired(&self, state: &mut State, now: Instant) {
        while let Some(&front) = state.timestamps.front() {
            if now.duration_since(front) >= self.config.window {
                state.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long the caller must wait before a slot would be available,
    /// `None` if one is available right now.
    fn delay_until_slot(&self, state: &State, now: Instant) -> Option<Duration> {
        let min_delay_wait = state
            .last_request
            .map(|last| self.config.min_delay.saturating_sub(now.duration_since(last)))
            .filter(|d| !d.is_zero());

        let window_wait = if state.timestamps.len() >= self.config.max_requests as usize {
            state
                .timestamps
                .front()
                .map(|&oldest| self.config.window.saturating_sub(now.duration_since(oldest)))
        } else {
            None
        };

        match (min_delay_wait, window_wait) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(a.max(b)),
        }
    }

    /// Record an admitted slot directly, without going through the queue —
    /// used to account for requests observed externally (e.g. retries done
    /// elsewhere, §4.8 `recordRequest`).
    pub fn record_request(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        self.evict_expired(&mut state, now);
        state.timestamps.push_back(now);
        state.last_request = Some(now);
    }

    /// Suspends the caller until a slot is available or `cancel` fires.
    /// Returns `false` on cancellation, `true` once admitted.
    pub async fn wait_for_slot(&self, cancel: &CancellationToken) -> bool {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                self.evict_expired(&mut state, now);
                match self.delay_until_slot(&state, now) {
                    None => {
                        state.timestamps.push_back(now);
                        state.last_request = Some(now);
                        return true;
                    }
                    Some(wait) => wait,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    pub fn in_window_count(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        self.evict_expired(&mut state, Instant::now());
        state.timestamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_requests: u32, window: Duration) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            window,
            min_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn admits_up_to_max_requests_without_waiting() {
        let limiter = RateLimiter::new(config(3, Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            assert!(limiter.wait_for_slot(&cancel).await);
        }
        assert_eq!(limiter.in_window_count(), 3);
    }

    #[tokio::test]
    async fn min_delay_is_enforced_between_calls() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1000,
            window: Duration::from_secs(60),
            min_delay: Duration::from_millis(30),
        });
        let cancel = CancellationToken::new();
        let start = Instant::now();
        limiter.wait_for_slot(&cancel).await;
        limiter.wait_for_slot(&cancel).await;
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_wait() {
        let limiter = RateLimiter::new(config(1, Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        assert!(limiter.wait_for_slot(&cancel).await);
        cancel.cancel();
        assert!(!limiter.wait_for_slot(&cancel).await);
    }

    #[tokio::test]
    async fn record_request_counts_against_the_window() {
        let limiter = RateLimiter::new(config(2, Duration::from_secs(60)));
        limiter.record_request();
        let cancel = CancellationToken::new();
        assert!(limiter.wait_for_slot(&cancel).await);
        assert_eq!(limiter.in_window_count(), 2);
    }
}
