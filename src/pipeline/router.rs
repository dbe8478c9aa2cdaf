//! Route entries and the per-instance router.
//!
//! One radix tree per method plus one for routes that accept any method.
//! Lookup tries the method's tree first, then the method-less tree.

use async_trait::async_trait;
use hyper::Method;
use matchit::Router as MatchitRouter;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::error;

use super::handlers::{CrossCutting, Exchange};
use crate::http::{RequestContext, Response, StatusCode};
use crate::request_map::RequestMap;

/// Business logic invoked with the canonical request map.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: RequestMap) -> Response;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(RequestMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn handle(&self, request: RequestMap) -> Response {
        (self)(request).await
    }
}

/// Where a route's handler runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandlerMode {
    /// On the instance's own execution thread. The handler must not block.
    #[default]
    NonBlocking,
    /// On the blocking pool, for handlers that do blocking I/O.
    Blocking,
}

/// A user route: path template, accepted methods, and handler.
#[derive(Clone)]
pub struct Route {
    path: String,
    methods: Vec<Method>,
    produces: Vec<String>,
    handler: Arc<dyn Handler>,
    mode: HandlerMode,
}

impl Route {
    /// Create a route accepting any method.
    ///
    /// Path variables may be written `:name` or `{name}`.
    pub fn new(path: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            path: path.into(),
            methods: Vec::new(),
            produces: Vec::new(),
            handler: Arc::new(handler),
            mode: HandlerMode::NonBlocking,
        }
    }

    pub fn get(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(path, handler).method(Method::GET)
    }

    pub fn post(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(path, handler).method(Method::POST)
    }

    /// Restrict the route to an additional method.
    pub fn method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// Declare a content type this route produces.
    pub fn produces(mut self, content_type: impl Into<String>) -> Self {
        self.produces.push(content_type.into());
        self
    }

    /// Run the handler on the blocking pool.
    pub fn blocking(mut self) -> Self {
        self.mode = HandlerMode::Blocking;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn mode(&self) -> HandlerMode {
        self.mode
    }

    async fn invoke(&self, request: RequestMap) -> Response {
        match self.mode {
            HandlerMode::NonBlocking => self.handler.handle(request).await,
            HandlerMode::Blocking => {
                let handler = Arc::clone(&self.handler);
                let runtime = Handle::current();
                let task = tokio::task::spawn_blocking(move || {
                    runtime.block_on(handler.handle(request))
                });
                match task.await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(path = %self.path, "blocking handler failed: {e}");
                        Response::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("produces", &self.produces)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// One element of the ordered pipeline.
#[derive(Debug, Clone)]
pub enum RouteEntry {
    /// Applies to every request, ahead of any route.
    CrossCutting(CrossCutting),
    /// A user route.
    Route(Route),
}

impl From<Route> for RouteEntry {
    fn from(route: Route) -> Self {
        RouteEntry::Route(route)
    }
}

/// Route registration failure.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route `{path}`: {source}")]
    Invalid {
        path: String,
        #[source]
        source: matchit::InsertError,
    },
}

/// Per-instance dispatcher built from the assembled pipeline.
pub struct Router {
    cross_cutting: Vec<CrossCutting>,
    by_method: HashMap<Method, MatchitRouter<Arc<Route>>>,
    any_method: MatchitRouter<Arc<Route>>,
}

impl Router {
    /// Build a router from pipeline entries. Cross-cutting entries keep their
    /// relative order.
    pub fn from_entries(entries: &[RouteEntry]) -> Result<Self, RouteError> {
        let mut router = Self {
            cross_cutting: Vec::new(),
            by_method: HashMap::new(),
            any_method: MatchitRouter::new(),
        };

        for entry in entries {
            match entry {
                RouteEntry::CrossCutting(handler) => router.cross_cutting.push(handler.clone()),
                RouteEntry::Route(route) => router.insert(route)?,
            }
        }
        Ok(router)
    }

    fn insert(&mut self, route: &Route) -> Result<(), RouteError> {
        let template = to_matchit_template(&route.path);
        let shared = Arc::new(route.clone());
        let invalid = |source: matchit::InsertError| RouteError::Invalid {
            path: route.path.clone(),
            source,
        };

        if route.methods.is_empty() {
            return self.any_method.insert(&template, shared).map_err(invalid);
        }
        for method in &route.methods {
            self.by_method
                .entry(method.clone())
                .or_default()
                .insert(&template, Arc::clone(&shared))
                .map_err(invalid)?;
        }
        Ok(())
    }

    pub fn cross_cutting(&self) -> &[CrossCutting] {
        &self.cross_cutting
    }

    /// Find the route for a request and the variables it matched. Variable
    /// values are percent-decoded; invalid UTF-8 is replaced.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Route>, Vec<(String, String)>)> {
        let matched = self
            .by_method
            .get(method)
            .and_then(|tree| tree.at(path).ok())
            .or_else(|| self.any_method.at(path).ok())?;

        let params = matched
            .params
            .iter()
            .map(|(k, v)| {
                (k.to_owned(), percent_decode_str(v).decode_utf8_lossy().into_owned())
            })
            .collect();
        Some((Arc::clone(matched.value), params))
    }

    /// Run one request through the cross-cutting handlers and its route.
    pub async fn dispatch(&self, ctx: RequestContext) -> Response {
        let matched = self.lookup(ctx.method(), ctx.uri().path());

        let exchange = Exchange {
            method: ctx.method().clone(),
            path: ctx.uri().path().to_string(),
            remote: ctx.connection().remote_addr.map(|addr| addr.to_string()),
            accept: ctx.header("accept").map(str::to_string),
            produces: matched
                .as_ref()
                .map(|(route, _)| route.produces.clone())
                .unwrap_or_default(),
            started: Instant::now(),
        };

        for handler in &self.cross_cutting {
            handler.on_request(&exchange);
        }

        let mut response = match matched {
            Some((route, params)) => {
                let request = RequestMap::from_context(&ctx.with_path_params(params));
                route.invoke(request).await
            }
            None => Response::error(StatusCode::NOT_FOUND, "Not Found"),
        };

        for handler in self.cross_cutting.iter().rev() {
            handler.on_response(&exchange, &mut response);
        }
        response
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("cross_cutting", &self.cross_cutting)
            .finish_non_exhaustive()
    }
}

/// Rewrite `:name` segments into matchit's `{name}` form.
fn to_matchit_template(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) if !name.is_empty() => format!("{{{name}}}"),
            _ => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}
