//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to Gateway / HttpServer at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new GatewayConfig sent over a channel
//!     → server merges the file's routes into the live registry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only routes are re-applied on reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AuthConfig, CircuitBreakerConfig, DiscoveryConfig, DiscoveryKind,
    GatewayConfig, HttpPollingConfig, ListenerConfig, LoadBalancingStrategy, LogFormat,
    ObservabilityConfig, RateLimitConfig, RateLimitRule, RegistryConfig,
    RegistryHealthCheckConfig, RetryConfig, RouteDefaults, SecurityConfig, TimeoutConfig,
    TokenIdentity,
};
pub use validation::{validate_config, ValidationError};
