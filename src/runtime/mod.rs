//! Lifecycle controller: engine, configuration, deployment, and the
//! bounded-blocking start and shutdown wrappers.

mod blocking;
mod config;
mod engine;
mod error;
mod instance;
mod server;
mod tls;

pub use blocking::{Interrupted, Interrupter, TimeUnit, Timeout, DEFAULT_TIMEOUT};
pub use config::{ErrorSink, FeatureFlags, ListenOptions, RouterFactory, ServerConfig, TlsOptions};
pub use engine::Engine;
pub use error::{BoxError, EngineError, InitializationError, ShutdownError};
pub use server::{DeploymentId, Server};
