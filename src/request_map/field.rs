//! The closed catalog of request fields and their extraction rules.
//!
//! Every rule is a small pure function from a [`RequestContext`] to an
//! optional [`Value`]. Rules never fail: anything that goes wrong while
//! extracting a field is reported as absence.

use std::collections::BTreeMap;

use hyper::{Method, Version};
use serde::{Serialize, Serializer};

use super::form;
use super::value::Value;
use crate::http::RequestContext;

/// Canonical request fields, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Body,
    ClientCert,
    FormParams,
    Headers,
    PathParams,
    Protocol,
    QueryString,
    RemoteAddr,
    RequestMethod,
    Scheme,
    ServerName,
    ServerPort,
    Uri,
}

impl Field {
    /// Every field, in catalog order.
    pub const ALL: [Field; 13] = [
        Field::Body,
        Field::ClientCert,
        Field::FormParams,
        Field::Headers,
        Field::PathParams,
        Field::Protocol,
        Field::QueryString,
        Field::RemoteAddr,
        Field::RequestMethod,
        Field::Scheme,
        Field::ServerName,
        Field::ServerPort,
        Field::Uri,
    ];

    /// The canonical key of this field.
    pub const fn name(self) -> &'static str {
        match self {
            Field::Body => "body",
            Field::ClientCert => "ssl-client-cert",
            Field::FormParams => "form-params",
            Field::Headers => "headers",
            Field::PathParams => "path-params",
            Field::Protocol => "protocol",
            Field::QueryString => "query-string",
            Field::RemoteAddr => "remote-addr",
            Field::RequestMethod => "request-method",
            Field::Scheme => "scheme",
            Field::ServerName => "server-name",
            Field::ServerPort => "server-port",
            Field::Uri => "uri",
        }
    }

    /// Look a field up by its canonical key.
    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|field| field.name() == name)
    }

    /// Evaluate this field's rule against a request.
    pub fn extract(self, ctx: &RequestContext) -> Option<Value> {
        match self {
            Field::Body => body(ctx),
            Field::ClientCert => client_cert(ctx),
            Field::FormParams => form_params(ctx),
            Field::Headers => headers(ctx),
            Field::PathParams => path_params(ctx),
            Field::Protocol => protocol(ctx),
            Field::QueryString => query_string(ctx),
            Field::RemoteAddr => remote_addr(ctx),
            Field::RequestMethod => request_method(ctx),
            Field::Scheme => scheme(ctx),
            Field::ServerName => server_name(ctx),
            Field::ServerPort => server_port(ctx),
            Field::Uri => uri(ctx),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Separator used when folding multi-valued headers.
pub const HEADER_SEPARATOR: char = ',';

fn body(ctx: &RequestContext) -> Option<Value> {
    ctx.body()
        .filter(|body| !body.is_empty())
        .map(|body| Value::Bytes(body.clone()))
}

// TODO: decide whether an unverified peer should fail the request instead of
// reading as "no certificate".
fn client_cert(ctx: &RequestContext) -> Option<Value> {
    let session = ctx.connection().tls.as_ref()?;
    let chain = session.peer_certificates().ok()?;
    Some(Value::Certificates(chain.to_vec()))
}

fn form_params(ctx: &RequestContext) -> Option<Value> {
    let content_type = ctx.header("content-type")?;
    if !form::expects_form(content_type) {
        return None;
    }
    let attributes = form::attributes(content_type, ctx.body()?);
    (!attributes.is_empty()).then_some(Value::Map(attributes))
}

fn headers(ctx: &RequestContext) -> Option<Value> {
    let headers = ctx.headers();
    if headers.is_empty() {
        return None;
    }

    let mut folded = BTreeMap::new();
    for name in headers.keys() {
        let mut joined = String::new();
        for (i, value) in headers.get_all(name).iter().enumerate() {
            if i > 0 {
                joined.push(HEADER_SEPARATOR);
            }
            joined.push_str(&String::from_utf8_lossy(value.as_bytes()));
        }
        // keys are lower-case whatever the engine's header model
        folded.insert(name.as_str().to_ascii_lowercase(), joined);
    }
    Some(Value::Map(folded))
}

fn path_params(ctx: &RequestContext) -> Option<Value> {
    let params = ctx.path_params();
    if params.is_empty() {
        return None;
    }
    let unique: BTreeMap<String, String> = params.iter().cloned().collect();
    Some(Value::Map(unique))
}

fn protocol(ctx: &RequestContext) -> Option<Value> {
    let token = match ctx.version() {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => return None,
    };
    Some(Value::Token(token))
}

fn query_string(ctx: &RequestContext) -> Option<Value> {
    ctx.uri()
        .query()
        .filter(|query| !query.is_empty())
        .map(|query| Value::Text(query.to_string()))
}

fn remote_addr(ctx: &RequestContext) -> Option<Value> {
    if let Some(forwarded) = ctx
        .headers()
        .get("x-forwarded-for")
        .filter(|v| !v.is_empty())
    {
        return Some(Value::Text(
            String::from_utf8_lossy(forwarded.as_bytes()).into_owned(),
        ));
    }
    ctx.connection()
        .remote_addr
        .map(|addr| Value::Text(addr.to_string()))
}

fn request_method(ctx: &RequestContext) -> Option<Value> {
    let token = match *ctx.method() {
        Method::GET => "get",
        Method::POST => "post",
        Method::PUT => "put",
        Method::DELETE => "delete",
        Method::PATCH => "patch",
        Method::HEAD => "head",
        Method::OPTIONS => "options",
        Method::TRACE => "trace",
        Method::CONNECT => "connect",
        _ => return None,
    };
    Some(Value::Token(token))
}

fn scheme(ctx: &RequestContext) -> Option<Value> {
    match ctx.scheme() {
        "http" => Some(Value::Token("http")),
        "https" => Some(Value::Token("https")),
        _ => None,
    }
}

fn server_name(ctx: &RequestContext) -> Option<Value> {
    Some(Value::Text(ctx.host()))
}

fn server_port(ctx: &RequestContext) -> Option<Value> {
    Some(Value::Port(ctx.local_port()))
}

fn uri(ctx: &RequestContext) -> Option<Value> {
    Some(Value::Text(ctx.uri().path().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ConnectionInfo, TlsSession};
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio_rustls::rustls::pki_types::CertificateDer;

    fn plain() -> ConnectionInfo {
        ConnectionInfo::plain(
            "127.0.0.1:8080".parse().unwrap(),
            Some("192.168.1.20:40112".parse().unwrap()),
        )
    }

    fn ctx(request: hyper::Request<()>, body: Option<&'static [u8]>) -> RequestContext {
        ctx_on(request, body, plain())
    }

    fn ctx_on(
        request: hyper::Request<()>,
        body: Option<&'static [u8]>,
        connection: ConnectionInfo,
    ) -> RequestContext {
        let (parts, _) = request.into_parts();
        RequestContext::new(parts, body.map(Bytes::from_static), Arc::new(connection))
    }

    fn get(uri: &str) -> hyper::Request<()> {
        hyper::Request::get(uri).body(()).unwrap()
    }

    #[test]
    fn test_names_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_name(field.name()), Some(field));
        }
        assert_eq!(Field::from_name("cookies"), None);
    }

    #[test]
    fn test_body_absent_when_empty_or_missing() {
        assert_eq!(Field::Body.extract(&ctx(get("/"), None)), None);
        assert_eq!(Field::Body.extract(&ctx(get("/"), Some(b""))), None);
        assert_eq!(
            Field::Body.extract(&ctx(get("/"), Some(b"payload"))),
            Some(Value::Bytes(Bytes::from_static(b"payload")))
        );
    }

    #[test]
    fn test_client_cert_requires_tls_and_verified_peer() {
        assert_eq!(Field::ClientCert.extract(&ctx(get("/"), None)), None);

        let unverified = plain().with_tls(TlsSession::new(None));
        assert_eq!(Field::ClientCert.extract(&ctx_on(get("/"), None, unverified)), None);

        let chain = vec![CertificateDer::from(vec![0x30, 0x82])];
        let verified = plain().with_tls(TlsSession::new(Some(chain.clone())));
        assert_eq!(
            Field::ClientCert.extract(&ctx_on(get("/"), None, verified)),
            Some(Value::Certificates(chain))
        );
    }

    #[test]
    fn test_form_params_only_for_form_requests() {
        let json = hyper::Request::post("/")
            .header("content-type", "application/json")
            .body(())
            .unwrap();
        assert_eq!(Field::FormParams.extract(&ctx(json, Some(b"a=1"))), None);

        let empty_form = hyper::Request::post("/")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(())
            .unwrap();
        assert_eq!(Field::FormParams.extract(&ctx(empty_form, Some(b""))), None);

        let form = hyper::Request::post("/")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(())
            .unwrap();
        let value = Field::FormParams.extract(&ctx(form, Some(b"q=a%20b"))).unwrap();
        assert_eq!(value.as_map().unwrap().get("q").unwrap(), "a b");
    }

    #[test]
    fn test_headers_fold_case_insensitively() {
        let request = hyper::Request::get("/")
            .header("X-Foo", "a")
            .header("x-foo", "b")
            .header("Accept", "text/html")
            .body(())
            .unwrap();

        let value = Field::Headers.extract(&ctx(request, None)).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("x-foo").unwrap(), "a,b");
        assert_eq!(map.get("accept").unwrap(), "text/html");
    }

    #[test]
    fn test_headers_absent_without_headers() {
        assert_eq!(Field::Headers.extract(&ctx(get("/"), None)), None);
    }

    #[test]
    fn test_path_params_keep_unique_keys() {
        let context = ctx(get("/a/42"), None).with_path_params(vec![
            ("id".to_string(), "42".to_string()),
            ("id".to_string(), "43".to_string()),
        ]);

        let value = Field::PathParams.extract(&context).unwrap();
        assert_eq!(value.as_map().unwrap().len(), 1);
        assert_eq!(Field::PathParams.extract(&ctx(get("/a"), None)), None);
    }

    #[test]
    fn test_protocol_lookup() {
        let mut request = get("/");
        *request.version_mut() = Version::HTTP_10;
        assert_eq!(
            Field::Protocol.extract(&ctx(request, None)),
            Some(Value::Token("HTTP/1.0"))
        );

        let mut request = get("/");
        *request.version_mut() = Version::HTTP_2;
        assert_eq!(
            Field::Protocol.extract(&ctx(request, None)),
            Some(Value::Token("HTTP/2"))
        );
    }

    #[test]
    fn test_query_string_is_raw() {
        assert_eq!(
            Field::QueryString.extract(&ctx(get("/s?q=a%20b&x=1"), None)),
            Some(Value::Text("q=a%20b&x=1".to_string()))
        );
        assert_eq!(Field::QueryString.extract(&ctx(get("/s"), None)), None);
        assert_eq!(Field::QueryString.extract(&ctx(get("/s?"), None)), None);
    }

    #[test]
    fn test_forwarded_for_wins_over_socket() {
        let request = hyper::Request::get("/")
            .header("X-Forwarded-For", "1.2.3.4")
            .body(())
            .unwrap();
        assert_eq!(
            Field::RemoteAddr.extract(&ctx(request, None)),
            Some(Value::Text("1.2.3.4".to_string()))
        );
        assert_eq!(
            Field::RemoteAddr.extract(&ctx(get("/"), None)),
            Some(Value::Text("192.168.1.20:40112".to_string()))
        );
    }

    #[test]
    fn test_forwarded_for_with_invalid_utf8_still_wins() {
        let request = hyper::Request::get("/")
            .header(
                "X-Forwarded-For",
                hyper::header::HeaderValue::from_bytes(b"10.0.0.\xff").unwrap(),
            )
            .body(())
            .unwrap();
        assert_eq!(
            Field::RemoteAddr.extract(&ctx(request, None)),
            Some(Value::Text("10.0.0.\u{fffd}".to_string()))
        );
    }

    #[test]
    fn test_remote_addr_absent_without_any_source() {
        let connection = ConnectionInfo::plain("127.0.0.1:8080".parse().unwrap(), None);
        assert_eq!(Field::RemoteAddr.extract(&ctx_on(get("/"), None, connection)), None);
    }

    #[test]
    fn test_request_method_tokens() {
        let delete = hyper::Request::delete("/").body(()).unwrap();
        assert_eq!(
            Field::RequestMethod.extract(&ctx(delete, None)),
            Some(Value::Token("delete"))
        );

        let custom = hyper::Request::builder()
            .method(Method::from_bytes(b"PURGE").unwrap())
            .uri("/")
            .body(())
            .unwrap();
        assert_eq!(Field::RequestMethod.extract(&ctx(custom, None)), None);
    }

    #[test]
    fn test_scheme_closed_set() {
        assert_eq!(Field::Scheme.extract(&ctx(get("/"), None)), Some(Value::Token("http")));

        let tls = plain().with_tls(TlsSession::default());
        assert_eq!(
            Field::Scheme.extract(&ctx_on(get("/"), None, tls)),
            Some(Value::Token("https"))
        );

        assert_eq!(Field::Scheme.extract(&ctx(get("ws://example.com/chat"), None)), None);
    }

    #[test]
    fn test_server_fields_and_uri() {
        let request = hyper::Request::get("/foo/bar?x=1")
            .header("host", "www.example.com")
            .body(())
            .unwrap();
        let context = ctx(request, None);

        assert_eq!(
            Field::ServerName.extract(&context),
            Some(Value::Text("www.example.com".to_string()))
        );
        assert_eq!(Field::ServerPort.extract(&context), Some(Value::Port(8080)));
        assert_eq!(Field::Uri.extract(&context), Some(Value::Text("/foo/bar".to_string())));
    }
}
