//! Server lifecycle: deploy and undeploy N instances on the engine.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::blocking::{wait_for, Interrupted, Interrupter, TimeUnit, Timeout, Wait, DEFAULT_TIMEOUT};
use super::config::{ErrorSink, ServerConfig};
use super::engine::Engine;
use super::error::{EngineError, InitializationError, ShutdownError};
use super::instance::Instance;
use super::tls;
use crate::pipeline::{assemble, DateClock, RouteEntry};

/// Identifier of one live deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeploymentId(Uuid);

impl DeploymentId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Deployment {
    id: DeploymentId,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    instances: Vec<JoinHandle<()>>,
    clock: Option<JoinHandle<()>>,
}

impl Deployment {
    /// Signal every instance and wait for all of them. Every failure goes to
    /// `sink`; the first is returned.
    async fn stop(self, sink: &ErrorSink) -> Result<(), EngineError> {
        self.shutdown.send_replace(true);

        let mut first = None;
        for task in self.instances.into_iter().chain(self.clock) {
            if let Err(err) = task.await {
                let err = EngineError::TaskFailed(err.to_string());
                sink(&err);
                first.get_or_insert(err);
            }
        }

        info!(deployment = %self.id, "server undeployed");
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

enum State {
    Idle,
    Deploying,
    Deployed(Deployment),
}

struct Shared {
    config: ServerConfig,
    pipeline: Arc<[RouteEntry]>,
    clock: DateClock,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A multi-instance HTTP server.
///
/// The handler pipeline is assembled once, at construction. Each deployment
/// binds the listener once and runs `instances` accept loops over it, each
/// with its own router built from that pipeline.
///
/// ```no_run
/// use burro::prelude::*;
///
/// let engine = Engine::with_defaults()?;
/// let server = Server::new(
///     ServerConfig::new(engine)
///         .port(8080)
///         .add_server_header(true)
///         .route(Route::get("/hello", |_req: RequestMap| async { Response::text("hi") })),
/// );
///
/// let id = server.start_sync()?;
/// println!("deployed {id} on {:?}", server.local_addr());
/// server.shutdown_sync()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Server {
    shared: Arc<Shared>,
    interrupter: Interrupter,
}

impl Server {
    /// Create a server, assembling its handler pipeline from `config`.
    pub fn new(config: ServerConfig) -> Self {
        let clock = DateClock::new();
        let pipeline = assemble(config.feature_flags(), &clock, config.route_list());
        debug!(entries = pipeline.len(), "pipeline assembled");

        Self {
            shared: Arc::new(Shared {
                config,
                pipeline: Arc::from(pipeline),
                clock,
                state: Mutex::new(State::Idle),
            }),
            interrupter: Interrupter::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        self.shared.config.engine()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// The assembled pipeline every instance routes through.
    pub fn pipeline(&self) -> &[RouteEntry] {
        &self.shared.pipeline
    }

    /// Handle that interrupts this server's blocking calls.
    pub fn interrupter(&self) -> &Interrupter {
        &self.interrupter
    }

    /// Id of the live deployment, if any.
    pub fn deployment(&self) -> Option<DeploymentId> {
        match &*self.shared.state() {
            State::Deployed(deployment) => Some(deployment.id),
            _ => None,
        }
    }

    /// Address the live deployment listens on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.shared.state() {
            State::Deployed(deployment) => Some(deployment.local_addr),
            _ => None,
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.deployment().is_some()
    }

    /// Deploy all instances.
    ///
    /// The deployment runs on the engine whether or not the returned future
    /// is polled. It resolves with the deployment id once every instance is
    /// accepting, or with the first failure.
    pub fn start(&self) -> impl Future<Output = Result<DeploymentId, EngineError>> + Send + 'static {
        let task = self.engine().handle().spawn(deploy(Arc::clone(&self.shared)));
        async move {
            task.await
                .map_err(|err| EngineError::TaskFailed(err.to_string()))?
        }
    }

    /// Deploy and block for up to [`DEFAULT_TIMEOUT`].
    pub fn start_sync(&self) -> Result<DeploymentId, InitializationError> {
        self.start_sync_timeout(DEFAULT_TIMEOUT.value, DEFAULT_TIMEOUT.unit)
    }

    /// Deploy and block for up to `timeout` `unit`s.
    ///
    /// A timed-out or interrupted call does not cancel the deployment; it may
    /// still complete afterwards.
    pub fn start_sync_timeout(
        &self,
        timeout: u64,
        unit: TimeUnit,
    ) -> Result<DeploymentId, InitializationError> {
        let limit = Timeout::new(timeout, unit);
        warn_if_on_runtime("start_sync");

        match wait_for(
            self.engine().handle(),
            self.start(),
            limit.as_duration(),
            &self.interrupter,
        ) {
            Wait::Completed(Ok(id)) => Ok(id),
            Wait::Completed(Err(err)) => Err(InitializationError::Failed(err)),
            Wait::TimedOut => Err(InitializationError::TimedOut(limit)),
            Wait::Interrupted => Err(InitializationError::Interrupted(Interrupted)),
        }
    }

    /// Undeploy all instances, letting in-flight requests finish.
    ///
    /// The live deployment is detached when this is called; the undeployment
    /// then runs on the engine whether or not the returned future is polled.
    pub fn shutdown(&self) -> impl Future<Output = Result<(), EngineError>> + Send + 'static {
        let detached = {
            let mut state = self.shared.state();
            match std::mem::replace(&mut *state, State::Idle) {
                State::Deployed(deployment) => Some(deployment),
                other => {
                    *state = other;
                    None
                }
            }
        };
        let sink = Arc::clone(self.shared.config.sink());

        let task = self.engine().handle().spawn(async move {
            match detached {
                Some(deployment) => deployment.stop(&sink).await,
                None => Err(EngineError::NotDeployed),
            }
        });
        async move {
            task.await
                .map_err(|err| EngineError::TaskFailed(err.to_string()))?
        }
    }

    /// Undeploy and block for up to [`DEFAULT_TIMEOUT`].
    pub fn shutdown_sync(&self) -> Result<(), ShutdownError> {
        self.shutdown_sync_timeout(DEFAULT_TIMEOUT.value, DEFAULT_TIMEOUT.unit)
    }

    /// Undeploy and block for up to `timeout` `unit`s.
    pub fn shutdown_sync_timeout(&self, timeout: u64, unit: TimeUnit) -> Result<(), ShutdownError> {
        let limit = Timeout::new(timeout, unit);
        warn_if_on_runtime("shutdown_sync");

        match wait_for(
            self.engine().handle(),
            self.shutdown(),
            limit.as_duration(),
            &self.interrupter,
        ) {
            Wait::Completed(Ok(())) => Ok(()),
            Wait::Completed(Err(err)) => Err(ShutdownError::Failed(err)),
            Wait::TimedOut => Err(ShutdownError::TimedOut(limit)),
            Wait::Interrupted => Err(ShutdownError::Interrupted(Interrupted)),
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.shared.config)
            .field("pipeline", &self.shared.pipeline.len())
            .field("deployment", &self.deployment())
            .finish()
    }
}

fn warn_if_on_runtime(operation: &str) {
    if Handle::try_current().is_ok() {
        warn!(operation, "blocking lifecycle call made from an async context");
    }
}

async fn deploy(shared: Arc<Shared>) -> Result<DeploymentId, EngineError> {
    let count = shared.config.instance_count();
    if count == 0 {
        return Err(EngineError::InvalidConfig(
            "instance count must be positive".to_string(),
        ));
    }

    {
        let mut state = shared.state();
        if !matches!(*state, State::Idle) {
            return Err(EngineError::AlreadyDeployed);
        }
        *state = State::Deploying;
    }

    match launch(&shared, count).await {
        Ok(deployment) => {
            let id = deployment.id;
            info!(
                deployment = %id,
                addr = %deployment.local_addr,
                instances = count,
                tls = shared.config.listen_options().tls.is_some(),
                "server deployed"
            );
            *shared.state() = State::Deployed(deployment);
            Ok(id)
        }
        Err(err) => {
            *shared.state() = State::Idle;
            Err(err)
        }
    }
}

async fn launch(shared: &Shared, count: usize) -> Result<Deployment, EngineError> {
    let factory = shared.config.factory();
    let routers = (0..count)
        .map(|_| factory(&shared.pipeline).map(Arc::new))
        .collect::<Result<Vec<_>, _>>()?;

    let listen = shared.config.listen_options();
    let tls = match &listen.tls {
        Some(options) => Some(tls::acceptor(options).await?),
        None => None,
    };

    let addr = listen.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| EngineError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| EngineError::Bind { addr, source })?;
    let listener = Arc::new(listener);

    let handle = shared.config.engine().handle();
    let (shutdown, _) = watch::channel(false);

    let clock = shared.config.feature_flags().add_date_header.then(|| {
        shared.clock.tick();
        shared.clock.spawn(handle, shutdown.subscribe())
    });

    let instances = routers
        .into_iter()
        .enumerate()
        .map(|(id, router)| {
            let instance = Instance {
                id,
                listener: Arc::clone(&listener),
                local_addr,
                tls: tls.clone(),
                router,
                sink: Arc::clone(shared.config.sink()),
            };
            handle.spawn(instance.run(shutdown.subscribe()))
        })
        .collect();

    Ok(Deployment {
        id: DeploymentId::new(),
        local_addr,
        shutdown,
        instances,
        clock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;
    use crate::pipeline::{Route, RouteError, Router};
    use crate::request_map::RequestMap;

    fn config() -> ServerConfig {
        ServerConfig::new(Engine::current())
            .host("127.0.0.1")
            .port(0)
            .instances(2)
            .route(Route::get("/", |_req: RequestMap| async { Response::ok() }))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_then_shutdown() {
        let server = Server::new(config().add_date_header(true));

        let id = server.start().await.unwrap();
        assert_eq!(server.deployment(), Some(id));
        assert_ne!(server.local_addr().unwrap().port(), 0);

        server.shutdown().await.unwrap();
        assert!(server.deployment().is_none());
        assert!(server.local_addr().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_start_is_rejected() {
        let server = Server::new(config());

        server.start().await.unwrap();
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyDeployed));

        server.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_without_deployment() {
        let server = Server::new(config());

        let err = server.shutdown().await.unwrap_err();
        assert!(matches!(err, EngineError::NotDeployed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_instances_is_invalid() {
        let server = Server::new(config().instances(0));

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert!(!server.is_deployed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_router_failure_fails_start_and_allows_retry() {
        let server = Server::new(config().router_factory(|_entries: &[RouteEntry]| {
            Router::from_entries(&[
                Route::get("/{id}", |_req: RequestMap| async { Response::ok() }).into(),
                Route::get("/{name}", |_req: RequestMap| async { Response::ok() }).into(),
            ])
        }));

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Route(RouteError::Invalid { .. })));
        assert!(!server.is_deployed());

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Route(_)));
    }

    #[test]
    fn test_deployment_id_is_unique() {
        assert_ne!(DeploymentId::new(), DeploymentId::new());
        assert_eq!(DeploymentId::new().to_string().len(), 36);
    }
}
