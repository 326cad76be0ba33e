//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: target assumed down, requests fail fast
//! - Half-Open: a bounded number of trial requests test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold within window
//! Open → Half-Open: first acquire after reset timeout
//! Half-Open → Closed: success_threshold trial successes
//! Half-Open → Open: any trial failure
//! ```
//!
//! # Design Decisions
//! - Per-target circuit breaker (service name, or route id for fixed URLs)
//! - Fail fast in Open state (no waiting for timeout)
//! - Trial slots are held by a [`BreakerPermit`] and released on drop
//! - Admin overrides freeze the state machine until reset

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    ForcedOpen,
    ForcedClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerOverride {
    pub kind: OverrideKind,
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// Result of one dispatch attempt, as seen by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
        }
    }
}

/// Why `acquire` refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerRejected {
    pub retry_after: Duration,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Bumped on every transition; stale permits compare against it.
    generation: u64,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    last_state_change: DateTime<Utc>,
    open_until: Option<Instant>,
    last_failure: Option<Instant>,
    override_: Option<BreakerOverride>,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            failure_count: 0,
            success_count: 0,
            half_open_in_flight: 0,
            last_state_change: Utc::now(),
            open_until: None,
            last_failure: None,
            override_: None,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    fn transition(&mut self, target: &str, next: CircuitState) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        self.generation += 1;
        self.half_open_in_flight = 0;
        self.success_count = 0;
        self.last_state_change = Utc::now();
        if next == CircuitState::Closed {
            self.failure_count = 0;
            self.open_until = None;
        }

        metrics::record_circuit_transition(target, next.as_str());
        match next {
            CircuitState::Open => tracing::warn!(
                target = %target,
                from = previous.as_str(),
                failures = self.failure_count,
                "Circuit opened"
            ),
            _ => tracing::info!(
                target = %target,
                from = previous.as_str(),
                to = next.as_str(),
                "Circuit state changed"
            ),
        }
    }

    fn open(&mut self, target: &str, now: Instant, reset_timeout: Duration) {
        self.open_until = Some(now + reset_timeout);
        if self.state == CircuitState::Open {
            self.generation += 1;
        } else {
            self.transition(target, CircuitState::Open);
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub target: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_in_flight: u32,
    pub last_state_change: DateTime<Utc>,
    /// Remaining time in Open, if open.
    pub open_for_ms: Option<u64>,
    #[serde(rename = "override")]
    pub override_: Option<BreakerOverride>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

type States = Arc<DashMap<String, BreakerState>>;

/// A permission to dispatch. Holding a half-open trial slot until dropped.
#[derive(Debug)]
pub struct BreakerPermit {
    states: States,
    target: String,
    trial_generation: Option<u64>,
}

impl BreakerPermit {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_trial(&self) -> bool {
        self.trial_generation.is_some()
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        let Some(generation) = self.trial_generation else { return };
        if let Some(mut state) = self.states.get_mut(&self.target) {
            if state.generation == generation && state.state == CircuitState::HalfOpen {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

/// Every target's breaker, created lazily.
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    states: States,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: Arc::new(DashMap::new()),
        }
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.config.reset_timeout_ms)
    }

    fn permit(&self, target: &str, trial_generation: Option<u64>) -> BreakerPermit {
        BreakerPermit {
            states: self.states.clone(),
            target: target.to_string(),
            trial_generation,
        }
    }

    pub fn acquire(&self, target: &str) -> Result<BreakerPermit, BreakerRejected> {
        self.acquire_at(target, Instant::now())
    }

    /// Ask to send a request to `target`.
    pub fn acquire_at(&self, target: &str, now: Instant) -> Result<BreakerPermit, BreakerRejected> {
        let Some(mut state) = self.states.get_mut(target) else {
            return Ok(self.permit(target, None));
        };

        match state.override_.as_ref().map(|o| o.kind) {
            Some(OverrideKind::ForcedClosed) => return Ok(self.permit(target, None)),
            Some(OverrideKind::ForcedOpen) => {
                state.total_rejections += 1;
                return Err(BreakerRejected {
                    retry_after: self.reset_timeout(),
                });
            }
            None => {}
        }

        if state.state == CircuitState::Open {
            match state.open_until {
                Some(until) if now < until => {
                    state.total_rejections += 1;
                    return Err(BreakerRejected {
                        retry_after: until - now,
                    });
                }
                _ => state.transition(target, CircuitState::HalfOpen),
            }
        }

        match state.state {
            CircuitState::HalfOpen => {
                if state.half_open_in_flight >= self.config.half_open_max_requests {
                    state.total_rejections += 1;
                    return Err(BreakerRejected {
                        retry_after: Duration::from_secs(1),
                    });
                }
                state.half_open_in_flight += 1;
                let generation = state.generation;
                drop(state);
                Ok(self.permit(target, Some(generation)))
            }
            _ => Ok(self.permit(target, None)),
        }
    }

    pub fn record(&self, target: &str, outcome: Outcome) {
        self.record_at(target, outcome, Instant::now())
    }

    /// Feed one attempt's outcome into the state machine.
    pub fn record_at(&self, target: &str, outcome: Outcome, now: Instant) {
        let mut state = self
            .states
            .entry(target.to_string())
            .or_insert_with(BreakerState::new);

        let failed = outcome != Outcome::Success;
        if failed {
            state.total_failures += 1;
        } else {
            state.total_successes += 1;
        }

        if state.override_.is_some() {
            return;
        }

        match (state.state, failed) {
            (CircuitState::Closed, false) => state.failure_count = 0,
            (CircuitState::Closed, true) => {
                let window = Duration::from_millis(self.config.failure_window_ms);
                if state
                    .last_failure
                    .is_some_and(|last| now.saturating_duration_since(last) > window)
                {
                    state.failure_count = 0;
                }
                state.failure_count += 1;
                state.last_failure = Some(now);
                if state.failure_count >= self.config.failure_threshold {
                    state.open(target, now, self.reset_timeout());
                }
            }
            (CircuitState::HalfOpen, false) => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.transition(target, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, true) => {
                state.last_failure = Some(now);
                state.open(target, now, self.reset_timeout());
            }
            // Late results from attempts started before the circuit opened.
            (CircuitState::Open, _) => {
                if failed {
                    state.last_failure = Some(now);
                }
            }
        }
    }

    fn set_override(&self, target: &str, kind: OverrideKind, reason: &str) {
        let mut state = self
            .states
            .entry(target.to_string())
            .or_insert_with(BreakerState::new);
        let next = match kind {
            OverrideKind::ForcedOpen => CircuitState::Open,
            OverrideKind::ForcedClosed => CircuitState::Closed,
        };
        state.transition(target, next);
        state.override_ = Some(BreakerOverride {
            kind,
            reason: reason.to_string(),
            since: Utc::now(),
        });
        tracing::warn!(target = %target, kind = ?kind, reason = %reason, "Circuit override set");
    }

    /// Reject everything until reset.
    pub fn force_open(&self, target: &str, reason: &str) {
        self.set_override(target, OverrideKind::ForcedOpen, reason);
    }

    /// Admit everything and ignore outcomes until reset.
    pub fn force_close(&self, target: &str, reason: &str) {
        self.set_override(target, OverrideKind::ForcedClosed, reason);
    }

    /// Clear any override and return to Closed with fresh counters.
    pub fn reset(&self, target: &str) {
        let mut state = self
            .states
            .entry(target.to_string())
            .or_insert_with(BreakerState::new);
        state.override_ = None;
        state.transition(target, CircuitState::Closed);
        state.failure_count = 0;
        state.last_failure = None;
        tracing::info!(target = %target, "Circuit reset");
    }

    pub fn status(&self, target: &str) -> Option<BreakerStatus> {
        let state = self.states.get(target)?;
        Some(Self::snapshot(target, &state, Instant::now()))
    }

    pub fn all_statuses(&self) -> Vec<BreakerStatus> {
        let now = Instant::now();
        let mut out: Vec<_> = self
            .states
            .iter()
            .map(|entry| Self::snapshot(entry.key(), entry.value(), now))
            .collect();
        out.sort_by(|a, b| a.target.cmp(&b.target));
        out
    }

    fn snapshot(target: &str, state: &BreakerState, now: Instant) -> BreakerStatus {
        let open_for_ms = match state.state {
            CircuitState::Open => state
                .open_until
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
            _ => None,
        };
        BreakerStatus {
            target: target.to_string(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            half_open_in_flight: state.half_open_in_flight,
            last_state_change: state.last_state_change,
            open_for_ms,
            override_: state.override_.clone(),
            total_successes: state.total_successes,
            total_failures: state.total_failures,
            total_rejections: state.total_rejections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakers(threshold: u32, reset_ms: u64, successes: u32, trials: u32) -> CircuitBreakers {
        CircuitBreakers::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            failure_window_ms: 60_000,
            reset_timeout_ms: reset_ms,
            success_threshold: successes,
            half_open_max_requests: trials,
        })
    }

    fn state_of(cb: &CircuitBreakers, target: &str) -> CircuitState {
        cb.status(target).unwrap().state
    }

    #[test]
    fn opens_after_threshold_and_rejects_until_reset_timeout() {
        let cb = breakers(3, 1_000, 1, 1);
        let t0 = Instant::now();

        for _ in 0..2 {
            cb.record_at("orders", Outcome::Failure, t0);
        }
        assert_eq!(state_of(&cb, "orders"), CircuitState::Closed);
        cb.record_at("orders", Outcome::Timeout, t0);
        assert_eq!(state_of(&cb, "orders"), CircuitState::Open);

        let rejected = cb.acquire_at("orders", t0 + Duration::from_millis(400)).unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_millis(600));
        assert_eq!(cb.status("orders").unwrap().total_rejections, 1);

        let permit = cb.acquire_at("orders", t0 + Duration::from_millis(1_000)).unwrap();
        assert!(permit.is_trial());
        assert_eq!(state_of(&cb, "orders"), CircuitState::HalfOpen);
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let cb = breakers(2, 1_000, 1, 1);
        let t0 = Instant::now();
        cb.record_at("a", Outcome::Failure, t0);
        cb.record_at("a", Outcome::Success, t0);
        cb.record_at("a", Outcome::Failure, t0);
        assert_eq!(state_of(&cb, "a"), CircuitState::Closed);
    }

    #[test]
    fn failures_outside_window_do_not_accumulate() {
        let cb = breakers(2, 1_000, 1, 1);
        let t0 = Instant::now();
        cb.record_at("a", Outcome::Failure, t0);
        cb.record_at("a", Outcome::Failure, t0 + Duration::from_millis(60_001));
        assert_eq!(state_of(&cb, "a"), CircuitState::Closed);
        assert_eq!(cb.status("a").unwrap().failure_count, 1);
    }

    #[test]
    fn half_open_limits_trials_and_closes_on_successes() {
        let cb = breakers(1, 100, 2, 1);
        let t0 = Instant::now();
        cb.record_at("a", Outcome::Failure, t0);

        let later = t0 + Duration::from_millis(100);
        let first = cb.acquire_at("a", later).unwrap();
        assert!(cb.acquire_at("a", later).is_err(), "only one trial slot");

        cb.record_at("a", Outcome::Success, later);
        drop(first);
        assert_eq!(state_of(&cb, "a"), CircuitState::HalfOpen);

        let second = cb.acquire_at("a", later).unwrap();
        cb.record_at("a", Outcome::Success, later);
        drop(second);
        assert_eq!(state_of(&cb, "a"), CircuitState::Closed);
        assert!(!cb.acquire_at("a", later).unwrap().is_trial());
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_timer() {
        let cb = breakers(1, 100, 1, 1);
        let t0 = Instant::now();
        cb.record_at("a", Outcome::Failure, t0);

        let trial_at = t0 + Duration::from_millis(150);
        let _permit = cb.acquire_at("a", trial_at).unwrap();
        cb.record_at("a", Outcome::Failure, trial_at);
        assert_eq!(state_of(&cb, "a"), CircuitState::Open);

        let err = cb.acquire_at("a", trial_at + Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.retry_after, Duration::from_millis(50));
    }

    #[test]
    fn dropped_permit_releases_trial_slot() {
        let cb = breakers(1, 10, 1, 1);
        let t0 = Instant::now();
        cb.record_at("a", Outcome::Failure, t0);
        let later = t0 + Duration::from_millis(10);

        let permit = cb.acquire_at("a", later).unwrap();
        drop(permit);
        assert_eq!(cb.status("a").unwrap().half_open_in_flight, 0);
        assert!(cb.acquire_at("a", later).is_ok());
    }

    #[test]
    fn stale_permit_does_not_steal_new_slot() {
        let cb = breakers(1, 10, 1, 1);
        let t0 = Instant::now();
        cb.record_at("a", Outcome::Failure, t0);
        let t1 = t0 + Duration::from_millis(10);

        let stale = cb.acquire_at("a", t1).unwrap();
        cb.record_at("a", Outcome::Failure, t1);
        let t2 = t1 + Duration::from_millis(10);
        let fresh = cb.acquire_at("a", t2).unwrap();
        drop(stale);

        assert_eq!(cb.status("a").unwrap().half_open_in_flight, 1);
        drop(fresh);
    }

    #[test]
    fn overrides_freeze_and_reset_clears() {
        let cb = breakers(1, 1_000, 1, 1);
        let now = Instant::now();

        cb.force_open("a", "maintenance");
        assert!(cb.acquire_at("a", now + Duration::from_secs(60)).is_err());
        let status = cb.status("a").unwrap();
        assert_eq!(status.override_.unwrap().reason, "maintenance");

        cb.force_close("a", "known flaky");
        for _ in 0..10 {
            cb.record_at("a", Outcome::Failure, now);
        }
        assert_eq!(state_of(&cb, "a"), CircuitState::Closed);
        assert!(cb.acquire_at("a", now).is_ok());

        cb.reset("a");
        let status = cb.status("a").unwrap();
        assert!(status.override_.is_none());
        assert_eq!(status.failure_count, 0);
        cb.record_at("a", Outcome::Failure, now);
        assert_eq!(state_of(&cb, "a"), CircuitState::Open);
    }

    #[test]
    fn unknown_target_is_admitted_without_state() {
        let cb = breakers(1, 1_000, 1, 1);
        assert!(cb.acquire("fresh").is_ok());
        assert!(cb.status("fresh").is_none());
        cb.record("fresh", Outcome::Success);
        assert_eq!(cb.all_statuses().len(), 1);
    }
}
