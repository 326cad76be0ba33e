//! Startup orchestration.
//!
//! # Responsibilities
//! - Name every way building the gateway can fail
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order: discovery, then routes, then listeners

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::routing::RouteError;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("discovery backend: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("route table: {0}")]
    Route(#[from] RouteError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
