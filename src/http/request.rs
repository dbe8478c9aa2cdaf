//! Live per-request context handed to the field extractors.

use bytes::Bytes;
use hyper::http::request::Parts;
use hyper::http::uri::Authority;
use hyper::{HeaderMap, Method, Uri, Version};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::rustls::pki_types::CertificateDer;

/// Raised when a TLS peer did not present a verified certificate chain.
#[derive(Debug, Clone, Copy, Error)]
#[error("peer not verified")]
pub struct PeerUnverified;

/// Negotiated TLS session of a connection.
#[derive(Debug, Clone, Default)]
pub struct TlsSession {
    peer_certificates: Option<Vec<CertificateDer<'static>>>,
}

impl TlsSession {
    /// Create a session from the chain the peer presented during the handshake.
    pub fn new(peer_certificates: Option<Vec<CertificateDer<'static>>>) -> Self {
        Self { peer_certificates }
    }

    /// The verified peer chain, leaf first.
    pub fn peer_certificates(&self) -> Result<&[CertificateDer<'static>], PeerUnverified> {
        match &self.peer_certificates {
            Some(chain) if !chain.is_empty() => Ok(chain),
            _ => Err(PeerUnverified),
        }
    }
}

/// Socket-level facts shared by every request on one connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Address the listener accepted the connection on.
    pub local_addr: SocketAddr,
    /// Peer address, when the transport exposes one.
    pub remote_addr: Option<SocketAddr>,
    /// TLS session, when the connection is transport-secured.
    pub tls: Option<TlsSession>,
}

impl ConnectionInfo {
    /// Create connection info for a plain-text connection.
    pub fn plain(local_addr: SocketAddr, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            local_addr,
            remote_addr,
            tls: None,
        }
    }

    /// Attach a TLS session.
    pub fn with_tls(mut self, tls: TlsSession) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// A request whose body has been buffered, together with its routing match
/// and connection. Read-only once built.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Option<Bytes>,
    path_params: Vec<(String, String)>,
    connection: Arc<ConnectionInfo>,
}

impl RequestContext {
    /// Create a context from request head parts and an already-buffered body.
    pub fn new(parts: Parts, body: Option<Bytes>, connection: Arc<ConnectionInfo>) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            path_params: Vec::new(),
            connection,
        }
    }

    /// Attach the variables matched by the router.
    pub fn with_path_params(mut self, params: Vec<(String, String)>) -> Self {
        self.path_params = params;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn path_params(&self) -> &[(String, String)] {
        &self.path_params
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// First value of a header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the connection is transport-secured.
    pub fn is_tls(&self) -> bool {
        self.connection.tls.is_some()
    }

    /// Request scheme: the absolute-form URI scheme when the client sent
    /// one, otherwise what the connection implies.
    pub fn scheme(&self) -> &str {
        match self.uri.scheme_str() {
            Some(scheme) => scheme,
            None if self.is_tls() => "https",
            None => "http",
        }
    }

    /// Host the request was addressed to, without port. Falls back to the
    /// local IP when the client named none.
    pub fn host(&self) -> String {
        self.header("host")
            .and_then(|value| value.parse::<Authority>().ok())
            .map(|authority| authority.host().to_string())
            .or_else(|| self.uri.host().map(str::to_string))
            .unwrap_or_else(|| self.connection.local_addr.ip().to_string())
    }

    /// Port of the local listener.
    pub fn local_port(&self) -> u16 {
        self.connection.local_addr.port()
    }
}
