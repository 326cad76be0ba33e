//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → registry.rs (load current table snapshot)
//!     → matcher.rs (exact path, then longest prefix pattern)
//!     → Return: Arc<RouteRule> or no match
//!
//! Admin / config reload:
//!     RouteRule
//!     → rule.rs (per-rule validation)
//!     → registry.rs (conflict checks, copy-on-write rebuild, atomic swap)
//! ```
//!
//! # Design Decisions
//! - Readers never block writers and never see a half-applied change
//! - No regex in hot path (exact maps and prefix literals only)
//! - Deterministic: same table and input always match the same rule
//! - Status is not a match condition; the pipeline decides what Inactive means

pub mod matcher;
pub mod registry;
pub mod rule;

pub use matcher::PathPattern;
pub use registry::{ImportMode, ImportReport, RouteError, RouteRegistry, RouteTableDocument};
pub use rule::{RouteRule, RouteStatus, RuleViolation, ANY_METHOD};
