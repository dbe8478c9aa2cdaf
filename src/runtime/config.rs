//! Server configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use super::engine::{available_parallelism, Engine};
use super::error::EngineError;
use crate::pipeline::{RouteEntry, RouteError, Router};

/// Builds the router of one server instance from the assembled pipeline.
pub type RouterFactory = Arc<dyn Fn(&[RouteEntry]) -> Result<Router, RouteError> + Send + Sync>;

/// Receives engine faults nothing else handles.
pub type ErrorSink = Arc<dyn Fn(&EngineError) + Send + Sync>;

/// Optional cross-cutting behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Log every request and its outcome.
    pub debug: bool,
    /// Add a `Date` header to responses.
    pub add_date_header: bool,
    /// Infer `Content-Type` from the route's produced types.
    pub add_content_type_header: bool,
    /// Add a `Server` header to responses.
    pub add_server_header: bool,
}

/// TLS material for the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// PEM certificate chain, leaf first.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
    /// PEM bundle of CAs trusted to sign client certificates. When set,
    /// clients are asked for a certificate but may connect without one.
    #[serde(default)]
    pub client_ca_path: Option<PathBuf>,
}

/// Where and how to listen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenOptions {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on; `0` picks a free port.
    pub port: u16,
    /// Serve HTTPS instead of HTTP.
    pub tls: Option<TlsOptions>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
        }
    }
}

impl ListenOptions {
    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Immutable-once-used server configuration.
///
/// Built fluently and handed to [`Server::new`](crate::Server::new), which
/// reads the route list and flags exactly once.
#[derive(Clone)]
pub struct ServerConfig {
    engine: Engine,
    instances: usize,
    listen: ListenOptions,
    routes: Vec<RouteEntry>,
    features: FeatureFlags,
    router_factory: RouterFactory,
    error_sink: ErrorSink,
}

impl ServerConfig {
    /// Create a config running on `engine`, one instance per CPU.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            instances: available_parallelism(),
            listen: ListenOptions::default(),
            routes: Vec::new(),
            features: FeatureFlags::default(),
            router_factory: Arc::new(Router::from_entries),
            error_sink: Arc::new(log_fault),
        }
    }

    /// Set the number of concurrently deployed instances.
    pub fn instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    /// Set the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.listen.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.listen.port = port;
        self
    }

    /// Serve over TLS.
    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.listen.tls = Some(tls);
        self
    }

    /// Replace all listen options.
    pub fn listen(mut self, listen: ListenOptions) -> Self {
        self.listen = listen;
        self
    }

    /// Append a route entry.
    pub fn route(mut self, entry: impl Into<RouteEntry>) -> Self {
        self.routes.push(entry.into());
        self
    }

    /// Append several route entries, in order.
    pub fn routes(mut self, entries: impl IntoIterator<Item = RouteEntry>) -> Self {
        self.routes.extend(entries);
        self
    }

    /// Replace all feature flags.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.features.debug = enabled;
        self
    }

    pub fn add_date_header(mut self, enabled: bool) -> Self {
        self.features.add_date_header = enabled;
        self
    }

    pub fn add_content_type_header(mut self, enabled: bool) -> Self {
        self.features.add_content_type_header = enabled;
        self
    }

    pub fn add_server_header(mut self, enabled: bool) -> Self {
        self.features.add_server_header = enabled;
        self
    }

    /// Use a custom per-instance router factory.
    pub fn router_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&[RouteEntry]) -> Result<Router, RouteError> + Send + Sync + 'static,
    {
        self.router_factory = Arc::new(factory);
        self
    }

    /// Route unhandled engine faults to `sink` instead of the log.
    pub fn error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&EngineError) + Send + Sync + 'static,
    {
        self.error_sink = Arc::new(sink);
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn instance_count(&self) -> usize {
        self.instances
    }

    pub fn listen_options(&self) -> &ListenOptions {
        &self.listen
    }

    pub fn route_list(&self) -> &[RouteEntry] {
        &self.routes
    }

    pub fn feature_flags(&self) -> &FeatureFlags {
        &self.features
    }

    pub(crate) fn factory(&self) -> &RouterFactory {
        &self.router_factory
    }

    pub(crate) fn sink(&self) -> &ErrorSink {
        &self.error_sink
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("engine", &self.engine)
            .field("instances", &self.instances)
            .field("listen", &self.listen)
            .field("routes", &self.routes.len())
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

fn log_fault(err: &EngineError) {
    error!(error = %err, "unhandled engine fault");
}
