//! One deployed server instance: an accept loop over the shared listener.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use super::config::ErrorSink;
use super::error::EngineError;
use crate::http::{ConnectionInfo, RequestContext, Response, StatusCode, TlsSession};
use crate::pipeline::Router;

/// Pause after a failed accept so a persistent fault (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct Instance {
    pub(crate) id: usize,
    pub(crate) listener: Arc<TcpListener>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) tls: Option<TlsAcceptor>,
    pub(crate) router: Arc<Router>,
    pub(crate) sink: ErrorSink,
}

impl Instance {
    /// Accept and serve connections until `shutdown` flips, then drain.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();
        debug!(instance = self.id, addr = %self.local_addr, "instance accepting");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        connections.spawn(connect(
                            stream,
                            remote,
                            self.local_addr,
                            self.tls.clone(),
                            Arc::clone(&self.router),
                            Arc::clone(&self.sink),
                            shutdown.clone(),
                        ));
                    }
                    Err(err) => {
                        (self.sink)(&EngineError::Accept(err));
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        (self.sink)(&EngineError::TaskFailed(err.to_string()));
                    }
                }
            }
        }

        debug!(instance = self.id, in_flight = connections.len(), "instance draining");
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                (self.sink)(&EngineError::TaskFailed(err.to_string()));
            }
        }
        debug!(instance = self.id, "instance stopped");
    }
}

async fn connect(
    stream: TcpStream,
    remote: SocketAddr,
    listen_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    router: Arc<Router>,
    sink: ErrorSink,
    shutdown: watch::Receiver<bool>,
) {
    let local = stream.local_addr().unwrap_or(listen_addr);
    let connection = ConnectionInfo::plain(local, Some(remote));

    let Some(acceptor) = tls else {
        serve(TokioIo::new(stream), Arc::new(connection), router, sink, shutdown).await;
        return;
    };

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => {
            let certs = stream
                .get_ref()
                .1
                .peer_certificates()
                .map(|chain| chain.to_vec());
            let connection = connection.with_tls(TlsSession::new(certs));
            serve(TokioIo::new(stream), Arc::new(connection), router, sink, shutdown).await;
        }
        Ok(Err(err)) => sink(&EngineError::Handshake {
            peer: remote.to_string(),
            source: err,
        }),
        Err(_) => sink(&EngineError::Handshake {
            peer: remote.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake timed out"),
        }),
    }
}

async fn serve<I>(
    io: I,
    connection: Arc<ConnectionInfo>,
    router: Arc<Router>,
    sink: ErrorSink,
    mut shutdown: watch::Receiver<bool>,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let peer = connection
        .remote_addr
        .map(|addr| addr.to_string())
        .unwrap_or_default();

    let service = service_fn(move |req| {
        let router = Arc::clone(&router);
        let connection = Arc::clone(&connection);
        async move { Ok::<_, Infallible>(handle(req, router, connection).await) }
    });

    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(source) = result {
        sink(&EngineError::Connection { peer, source });
    }
}

async fn handle(
    req: hyper::Request<Incoming>,
    router: Arc<Router>,
    connection: Arc<ConnectionInfo>,
) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!("Failed to read request body: {}", err);
            return build_response(Response::error(StatusCode::BAD_REQUEST, err.to_string()));
        }
    };
    let body = if body.is_empty() { None } else { Some(body) };

    let ctx = RequestContext::new(parts, body, connection);
    build_response(router.dispatch(ctx).await)
}

/// Convert a pipeline response into a hyper response. Headers that are not
/// valid HTTP are dropped.
fn build_response(response: Response) -> hyper::Response<Full<Bytes>> {
    let status = hyper::StatusCode::from_u16(response.status.0).unwrap_or_else(|_| {
        warn!(
            "Invalid status code {}, falling back to 500 Internal Server Error",
            response.status.0
        );
        hyper::StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut out = hyper::Response::new(Full::new(response.body.unwrap_or_default()));
    *out.status_mut() = status;

    let headers = out.headers_mut();
    for (name, value) in response.headers {
        match (
            hyper::header::HeaderName::from_bytes(name.as_bytes()),
            hyper::header::HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "dropping invalid response header"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_response_copies_status_headers_body() {
        let response = Response::text("hello").header("x-trace", "abc");
        let out = build_response(response);

        assert_eq!(out.status(), hyper::StatusCode::OK);
        assert_eq!(out.headers()["x-trace"], "abc");
    }

    #[test]
    fn test_build_response_drops_invalid_headers() {
        let response = Response::new(StatusCode::NO_CONTENT).header("bad header", "x").header("ok", "bad\nvalue");
        let out = build_response(response);

        assert_eq!(out.status(), hyper::StatusCode::NO_CONTENT);
        assert!(out.headers().is_empty());
    }

    #[test]
    fn test_build_response_invalid_status() {
        let out = build_response(Response::new(StatusCode(1000)));
        assert_eq!(out.status(), hyper::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
