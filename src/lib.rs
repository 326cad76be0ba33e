//! Edge Gateway Library
//!
//! Request routing and resilience core of an API gateway: a mutable route
//! table, service discovery, admission control, circuit breaking and
//! forwarding with retry and timeout discipline.

pub mod admin;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::Gateway;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
