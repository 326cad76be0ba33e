//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to target:
//!     → circuit_breaker.rs (acquire permit, fail fast when open)
//!     → timeouts.rs (enforce per-attempt deadline)
//!     → On failure: retries.rs (budget check, jittered backoff)
//!     → circuit_breaker.rs (record every attempt's outcome)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream attempt has a deadline
//! - The breaker gate runs once per request; every attempt is recorded
//! - Circuit breaker prevents cascading failures

pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerPermit, BreakerRejected, BreakerStatus, CircuitBreakers, CircuitState, Outcome,
};
pub use retries::{is_retryable_status, RetryPolicy};
pub use timeouts::{within, TimedOut};
