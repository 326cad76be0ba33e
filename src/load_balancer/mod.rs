//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → target service identified
//!     → discovery (healthy instances of the service)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through instances, cursor per service)
//!         - random.rs (uniform pick)
//!     → Return selected instance or None
//! ```
//!
//! # Design Decisions
//! - Strategies only choose; health filtering happens in discovery
//! - Selection state is keyed by service name, so instance churn is harmless
//! - Strategy chosen once from config

pub mod random;
pub mod round_robin;

use std::sync::Arc;

use crate::config::LoadBalancingStrategy;
use crate::discovery::ServiceInstance;

pub use random::RandomPick;
pub use round_robin::RoundRobin;

/// Picks one instance out of a candidate set.
pub trait LoadBalancer: Send + Sync {
    fn pick<'a>(
        &self,
        service: &str,
        instances: &'a [ServiceInstance],
    ) -> Option<&'a ServiceInstance>;
}

pub fn from_strategy(strategy: LoadBalancingStrategy) -> Arc<dyn LoadBalancer> {
    match strategy {
        LoadBalancingStrategy::RoundRobin => Arc::new(RoundRobin::new()),
        LoadBalancingStrategy::Random => Arc::new(RandomPick),
    }
}
