//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout layers)
//!     → request.rs (request ID, client IP, body buffering)
//!     → [gateway pipeline decides target]
//!     → dispatcher.rs (instance pick, rewrite, retry, forward)
//!     → response.rs (error mapping, JSON bodies)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::{Dispatcher, ForwardRequest, HyperUpstream, Target, Upstream, UpstreamError};
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
