//! HTTP types shared by the pipeline and the request map.

mod request;
mod response;

pub use request::{ConnectionInfo, PeerUnverified, RequestContext, TlsSession};
pub use response::{Response, StatusCode};
