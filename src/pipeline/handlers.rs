//! Cross-cutting handlers applied to every request regardless of route.

use arc_swap::ArcSwap;
use hyper::Method;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::http::Response;

/// Value of the `Server` response header.
pub const SERVER_HEADER_VALUE: &str = "burro";

/// How often the shared date clock is refreshed.
const CLOCK_RESOLUTION: Duration = Duration::from_secs(1);

/// Shared, periodically refreshed `Date` header value.
///
/// One clock per server renders the date once a second; every instance
/// reads the cached string.
#[derive(Clone)]
pub struct DateClock {
    current: Arc<ArcSwap<String>>,
}

impl DateClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(render_now())),
        }
    }

    /// The cached HTTP date.
    pub fn now(&self) -> Arc<String> {
        self.current.load_full()
    }

    /// Re-render the cached value.
    pub fn tick(&self) {
        self.current.store(Arc::new(render_now()));
    }

    /// Refresh the clock on `handle` until `shutdown` flips.
    pub(crate) fn spawn(&self, handle: &Handle, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let clock = self.clone();
        handle.spawn(async move {
            let mut interval = tokio::time::interval(CLOCK_RESOLUTION);
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => clock.tick(),
                }
            }
            debug!("date clock stopped");
        })
    }
}

impl Default for DateClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DateClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateClock")
            .field("current", &self.now())
            .finish()
    }
}

fn render_now() -> String {
    httpdate::fmt_http_date(SystemTime::now())
}

/// What the cross-cutting handlers get to see of a request.
#[derive(Debug, Clone)]
pub(crate) struct Exchange {
    pub method: Method,
    pub path: String,
    pub remote: Option<String>,
    pub accept: Option<String>,
    pub produces: Vec<String>,
    pub started: Instant,
}

/// A request/response step applied ahead of user handlers.
#[derive(Debug, Clone)]
pub enum CrossCutting {
    /// Logs every request and its outcome.
    RequestLogger,
    /// Adds a `Date` header from the shared clock.
    DateHeader(DateClock),
    /// Sets `Content-Type` from the route's produced types.
    ContentType,
    /// Adds a `Server` header.
    ServerHeader,
}

impl CrossCutting {
    pub fn name(&self) -> &'static str {
        match self {
            CrossCutting::RequestLogger => "request-logger",
            CrossCutting::DateHeader(_) => "date-header",
            CrossCutting::ContentType => "content-type",
            CrossCutting::ServerHeader => "server-header",
        }
    }

    pub(crate) fn on_request(&self, exchange: &Exchange) {
        if let CrossCutting::RequestLogger = self {
            debug!(
                method = %exchange.method,
                path = %exchange.path,
                remote = exchange.remote.as_deref().unwrap_or("-"),
                "request received"
            );
        }
    }

    pub(crate) fn on_response(&self, exchange: &Exchange, response: &mut Response) {
        match self {
            CrossCutting::RequestLogger => {
                info!(
                    method = %exchange.method,
                    path = %exchange.path,
                    status = response.status.0,
                    remote = exchange.remote.as_deref().unwrap_or("-"),
                    elapsed_us = exchange.started.elapsed().as_micros() as u64,
                    "request completed"
                );
            }
            CrossCutting::DateHeader(clock) => {
                if !response.has_header("date") {
                    response.set_header("date", clock.now().as_str());
                }
            }
            CrossCutting::ContentType => {
                if response.has_header("content-type") || !response.has_body() {
                    return;
                }
                if let Some(content_type) =
                    negotiate(exchange.accept.as_deref(), &exchange.produces)
                {
                    response.set_header("content-type", content_type);
                }
            }
            CrossCutting::ServerHeader => {
                response.set_header("server", SERVER_HEADER_VALUE);
            }
        }
    }
}

/// Pick the first produced type the client accepts; the first produced type
/// when it states no preference or nothing matches.
fn negotiate<'a>(accept: Option<&str>, produces: &'a [String]) -> Option<&'a str> {
    let first = produces.first()?;
    let Some(accept) = accept else {
        return Some(first.as_str());
    };

    let ranges: Vec<&str> = accept
        .split(',')
        .map(|range| range.split(';').next().unwrap_or_default().trim())
        .filter(|range| !range.is_empty())
        .collect();

    let chosen = produces
        .iter()
        .find(|produced| ranges.iter().any(|range| media_matches(range, produced)))
        .unwrap_or(first);
    Some(chosen.as_str())
}

fn media_matches(range: &str, media_type: &str) -> bool {
    if range == "*/*" || range.eq_ignore_ascii_case(media_type) {
        return true;
    }
    match (range.split_once('/'), media_type.split_once('/')) {
        (Some((range_type, "*")), Some((actual_type, _))) => {
            range_type.eq_ignore_ascii_case(actual_type)
        }
        _ => false,
    }
}
