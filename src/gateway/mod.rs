//! Gateway request pipeline.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → routing (match rule, snapshot captured)
//!     → route status check
//!     → middleware.rs (named hooks, in declared order)
//!     → authentication (when the rule requires it)
//!     → rate limiting (route, global, IP, user, path)
//!     → circuit breaker gate
//!     → discovery + dispatch (http::dispatcher)
//!     → middleware response hooks (reverse order)
//! ```
//!
//! # Design Decisions
//! - Stage order is fixed; any rejection short-circuits later stages
//! - All collaborators are trait objects chosen at build time

pub mod middleware;
pub mod pipeline;

pub use middleware::{builtin_names, Middleware, MiddlewareRegistry, RequestContext};
pub use pipeline::{Gateway, GatewayBuilder};
