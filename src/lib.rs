//! # Burro - multi-instance HTTP server with canonical request maps
//!
//! Burro deploys N server instances over one shared listener on a tokio
//! engine, routes every request through a fixed pipeline of cross-cutting
//! handlers, and hands user handlers an immutable [`RequestMap`] instead of
//! the raw request.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Server (lifecycle)                           │
//! │   start / start_sync ──► deploy N instances ──► DeploymentId        │
//! │   shutdown / shutdown_sync ──► drain and stop every instance        │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Pipeline (per instance router)                  │
//! │  request-logger ─► date-header ─► content-type ─► server-header     │
//! │                          ─► user routes                             │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │               RequestMap (canonical, absent keys omitted)           │
//! │  body  headers  uri  query-string  path-params  form-params  ...    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use burro::prelude::*;
//!
//! async fn hello(request: RequestMap) -> Response {
//!     let name = request.path_param("name").unwrap_or("world");
//!     Response::text(format!("Hello, {name}!"))
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new(Engine::with_defaults()?)
//!         .port(8080)
//!         .add_date_header(true)
//!         .add_server_header(true)
//!         .route(Route::get("/hello/{name}", hello));
//!
//!     let server = Server::new(config);
//!     server.start_sync()?;
//!     // ...
//!     server.shutdown_sync()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Blocking calls
//!
//! `start_sync` and `shutdown_sync` park the calling thread for a bounded
//! time and fail in one of three distinguishable ways: the operation failed,
//! the wait timed out, or the wait was interrupted through the server's
//! [`Interrupter`]. Timing out never cancels the operation itself.

pub mod http;
pub mod pipeline;
pub mod request_map;
pub mod runtime;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::http::{Response, StatusCode};
    pub use crate::pipeline::{Handler, Route, RouteEntry};
    pub use crate::request_map::{Field, RequestMap, Value};
    pub use crate::runtime::{
        Engine, EngineError, InitializationError, Server, ServerConfig, ShutdownError, TimeUnit,
    };
    pub use async_trait::async_trait;
}

pub use http::{Response, StatusCode};
pub use pipeline::{Handler, Route, RouteEntry};
pub use request_map::{Field, RequestMap};
pub use runtime::{
    DeploymentId, Engine, EngineError, FeatureFlags, InitializationError, Interrupter, Server,
    ServerConfig, ShutdownError, TimeUnit, Timeout,
};
