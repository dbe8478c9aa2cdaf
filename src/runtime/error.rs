//! Lifecycle error types.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

use super::blocking::{Interrupted, Timeout};
use crate::pipeline::RouteError;

/// Boxed cause carried by engine faults.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Faults raised by the engine while deploying, serving, or undeploying.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration cannot be deployed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The listener could not be bound, e.g. the port is in use.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TLS material could not be loaded or assembled.
    #[error("TLS setup failed: {context}")]
    Tls {
        context: String,
        #[source]
        source: BoxError,
    },

    /// An instance could not build its router.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// The server already has a live deployment.
    #[error("server is already deployed")]
    AlreadyDeployed,

    /// Shutdown was requested with no live deployment.
    #[error("no deployment to shut down")]
    NotDeployed,

    /// An engine task panicked or was cancelled.
    #[error("engine task failed: {0}")]
    TaskFailed(String),

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The TLS handshake with a peer failed.
    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// Serving an established connection failed.
    #[error("connection from {peer} failed: {source}")]
    Connection {
        peer: String,
        #[source]
        source: BoxError,
    },
}

/// Failure of a bounded-blocking start.
#[derive(Debug, Error)]
pub enum InitializationError {
    /// The deployment reported a failure.
    #[error("server initialization failed: {0}")]
    Failed(#[source] EngineError),

    /// No outcome was observed in time. The deployment may still complete.
    #[error("server start up timed out after {0}")]
    TimedOut(Timeout),

    /// The waiting thread was interrupted.
    #[error("thread interrupted during initialization")]
    Interrupted(#[source] Interrupted),
}

/// Failure of a bounded-blocking shutdown.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The undeployment reported a failure.
    #[error("server shutdown failed: {0}")]
    Failed(#[source] EngineError),

    /// No outcome was observed in time. The undeployment may still complete.
    #[error("server shutdown timed out after {0}")]
    TimedOut(Timeout),

    /// The waiting thread was interrupted.
    #[error("thread interrupted during shutdown")]
    Interrupted(#[source] Interrupted),
}
