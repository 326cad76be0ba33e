//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (after route match):
//!     → auth.rs (bearer token → Identity, when the route requires it)
//!     → rate_limit.rs (route, global, per-IP, per-user, per-path quotas)
//!         → counter_store.rs (window counters)
//!     → headers.rs (sanitize, add X-Forwarded-* and identity headers)
//!     → Pass to dispatch
//! ```
//!
//! # Design Decisions
//! - Authentication fails closed; the rate-limit store fails open
//! - No trust in client-supplied forwarding or identity headers

pub mod auth;
pub mod counter_store;
pub mod headers;
pub mod rate_limit;

pub use auth::{bearer_token, AuthError, Authenticator, Identity, StaticTokenAuthenticator};
pub use counter_store::{CounterStore, MemoryCounterStore, RateLimitStoreError, WindowCount};
pub use rate_limit::{Decision, LimitTier, RateLimitStats, RateLimiter};
