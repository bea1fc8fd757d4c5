//! Failover controller (§4.7): tracks per-provider connection health and
//! decides when to switch a `DataSourceKind`'s active provider, grounded on
//! the teacher's engine-health/circuit-breaker bookkeeping pattern (atomics
//! + a small state struct per tracked entity, no background polling thread
//! of its own — driven by events as they arrive).

use crate::providers::{ConnectionHealth, DataSourceKind};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A provider's observed health at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Down,
}

struct Tracked {
    active_provider: String,
    last_connected_at: Option<Instant>,
    last_error_at: Option<Instant>,
    /// Error timestamps within `error_window`, oldest first.
    errors: VecDeque<Instant>,
    state: HealthState,
    /// When the current provider became healthy again after being degraded
    /// or down, used to gate failback via `recovery_stable`.
    recovered_at: Option<Instant>,
}

impl Tracked {
    fn new(provider: String) -> Self {
        Self {
            active_provider: provider,
            last_connected_at: None,
            last_error_at: None,
            errors: VecDeque::new(),
            state: HealthState::Healthy,
            recovered_at: None,
        }
    }
}

/// A decision the controller wants the caller to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverAction {
    /// Switch `source` to `to_provider`. The caller must connect and
    /// subscribe the new client *before* tearing down the old one
    /// (§4.7 "switch before disconnect") and must emit
    /// `IntegrityKind::Reset` for every symbol carried over.
    SwitchTo { source: DataSourceKind, to_provider: String },
    None,
}

/// Tracks provider health per [`DataSourceKind`] and decides failover /
/// failback transitions. Does not itself hold provider clients or perform
/// I/O — it is a pure decision engine the composition layer drives.
pub struct FailoverController {
    failover_after: Duration,
    error_window: Duration,
    error_threshold: u32,
    recovery_stable: Duration,
    tracked: DashMap<DataSourceKind, Mutex<Tracked>>,
    /// Ordered fallback chain per source, most-preferred first.
    fallback_chains: DashMap<DataSourceKind, Vec<String>>,
}

impl FailoverController {
    pub fn new(config: &crate::config::FailoverConfig) -> Self {
        Self {
            failover_after: config.failover_after,
            error_window: config.error_window,
            error_threshold: config.error_threshold,
            recovery_stable: config.recovery_stable,
            tracked: DashMap::new(),
            fallback_chains: DashMap::new(),
        }
    }

    /// Registers the ordered provider fallback chain for a source and seeds
    /// it as active on the first (most-preferred) entry.
    pub fn register(&self, source: DataSourceKind, chain: Vec<String>) {
        if let Some(primary) = chain.first().cloned() {
            self.tracked.insert(source.clone(), Mutex::new(Tracked::new(primary)));
        }
        self.fallback_chains.insert(source, chain);
    }

    pub fn active_provider(&self, source: &DataSourceKind) -> Option<String> {
        self.tracked.get(source).map(|t| t.lock().unwrap().active_provider.clone())
    }

    fn evict_expired_errors(&self, tracked: &mut Tracked, now: Instant) {
        while let Some(&front) = tracked.errors.front() {
            if now.duration_since(front) >= self.error_window {
                tracked.errors.pop_front();
            } else {
                break;
            }
        }
    }

    /// Feeds a connection health event for the currently-active provider of
    /// `source` and returns the action the caller should take, if any.
    pub fn on_health_event(&self, source: &DataSourceKind, event: &ConnectionHealth) -> FailoverAction {
        let Some(entry) = self.tracked.get(source) else {
            return FailoverAction::None;
        };
        let mut tracked = entry.lock().unwrap();
        let now = Instant::now();
        self.evict_expired_errors(&mut tracked, now);

        match event {
            ConnectionHealth::Connected => {
                let was_unhealthy = tracked.state != HealthState::Healthy;
                tracked.state = HealthState::Healthy;
                tracked.last_connected_at = Some(now);
                if was_unhealthy {
                    tracked.recovered_at = Some(now);
                }
                return FailoverAction::None;
            }
            ConnectionHealth::Error { .. } => {
                tracked.last_error_at = Some(now);
                tracked.errors.push_back(now);
                tracked.recovered_at = None;
                if tracked.errors.len() as u32 >= self.error_threshold {
                    tracked.state = HealthState::Degraded;
                }
            }
            ConnectionHealth::Disconnected => {
                tracked.state = HealthState::Down;
                tracked.recovered_at = None;
            }
            ConnectionHealth::Stale => {
                tracked.state = HealthState::Degraded;
                tracked.recovered_at = None;
            }
        }

        let stale_too_long = tracked
            .last_connected_at
            .map(|last| now.duration_since(last) >= self.failover_after)
            .unwrap_or(true);

        if tracked.state != HealthState::Healthy && stale_too_long {
            if let Some(next) = self.next_provider(source, &tracked.active_provider) {
                tracked.active_provider = next.clone();
                tracked.state = HealthState::Healthy;
                tracked.errors.clear();
                tracked.last_connected_at = Some(now);
                tracked.recovered_at = None;
                return FailoverAction::SwitchTo { source: source.clone(), to_provider: next };
            }
        }

        FailoverAction::None
    }

    fn next_provider(&self, source: &DataSourceKind, current: &str) -> Option<String> {
        let chain = self.fallback_chains.get(source)?;
        let idx = chain.iter().position(|p| p == current)?;
        chain.get(idx + 1).cloned().or_else(|| chain.first().cloned().filter(|p| p != current))
    }

    /// Whether the active provider has been healthy for at least
    /// `recovery_stable`, i.e. a prior degraded provider may be failed back
    /// to (§4.7 "failback only after a stability window").
    pub fn is_recovery_stable(&self, source: &DataSourceKind) -> bool {
        let Some(entry) = self.tracked.get(source) else { return false };
        let tracked = entry.lock().unwrap();
        tracked
            .recovered_at
            .map(|at| Instant::now().duration_since(at) >= self.recovery_stable)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailoverConfig;

    fn controller(error_threshold: u32) -> FailoverController {
        FailoverController::new(&FailoverConfig {
            failover_after: Duration::ZERO,
            error_window: Duration::from_secs(60),
            error_threshold,
            recovery_stable: Duration::from_millis(10),
        })
    }

    #[test]
    fn stays_on_primary_while_healthy() {
        let ctl = controller(3);
        ctl.register(DataSourceKind::Alpaca, vec!["primary".into(), "backup".into()]);
        let action = ctl.on_health_event(&DataSourceKind::Alpaca, &ConnectionHealth::Connected);
        assert_eq!(action, FailoverAction::None);
        assert_eq!(ctl.active_provider(&DataSourceKind::Alpaca), Some("primary".to_string()));
    }

    #[test]
    fn switches_after_error_threshold_and_lapsed_connection() {
        let ctl = controller(2);
        ctl.register(DataSourceKind::Alpaca, vec!["primary".into(), "backup".into()]);
        ctl.on_health_event(&DataSourceKind::Alpaca, &ConnectionHealth::Error { message: "x".into() });
        let action = ctl.on_health_event(&DataSourceKind::Alpaca, &ConnectionHealth::Error { message: "y".into() });
        assert_eq!(
            action,
            FailoverAction::SwitchTo { source: DataSourceKind::Alpaca, to_provider: "backup".to_string() }
        );
        assert_eq!(ctl.active_provider(&DataSourceKind::Alpaca), Some("backup".to_string()));
    }

    #[test]
    fn disconnect_switches_to_next_in_chain() {
        let ctl = controller(10);
        ctl.register(DataSourceKind::Polygon, vec!["primary".into(), "backup".into()]);
        let action = ctl.on_health_event(&DataSourceKind::Polygon, &ConnectionHealth::Disconnected);
        assert_eq!(
            action,
            FailoverAction::SwitchTo { source: DataSourceKind::Polygon, to_provider: "backup".to_string() }
        );
    }

    #[test]
    fn recovery_is_not_stable_immediately_after_reconnect() {
        let ctl = controller(10);
        ctl.register(DataSourceKind::Iex, vec!["primary".into()]);
        ctl.on_health_event(&DataSourceKind::Iex, &ConnectionHealth::Disconnected);
        ctl.on_health_event(&DataSourceKind::Iex, &ConnectionHealth::Connected);
        assert!(!ctl.is_recovery_stable(&DataSourceKind::Iex));
    }

    #[test]
    fn unregistered_source_yields_no_action() {
        let ctl = controller(1);
        let action = ctl.on_health_event(&DataSourceKind::Iex, &ConnectionHealth::Disconnected);
        assert_eq!(action, FailoverAction::None);
    }
}
