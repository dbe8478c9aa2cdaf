//! Values held by a [`RequestMap`](super::RequestMap).

use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tokio_rustls::rustls::pki_types::CertificateDer;

/// A present request field value.
///
/// There is no null variant: a field that has nothing to say is left out of
/// the map instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Raw bytes, e.g. the request body.
    Bytes(Bytes),
    /// Free-form text, e.g. the URI path or the remote address.
    Text(String),
    /// A token from a closed vocabulary, e.g. `get` or `https`.
    Token(&'static str),
    /// A port number.
    Port(u16),
    /// Name to value mapping with unique keys.
    Map(BTreeMap<String, String>),
    /// A DER-encoded certificate chain, leaf first.
    Certificates(Vec<CertificateDer<'static>>),
}

impl Value {
    /// Text or token content.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::Token(token) => Some(token),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<u16> {
        match self {
            Value::Port(port) => Some(*port),
            _ => None,
        }
    }

    pub fn as_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        match self {
            Value::Certificates(chain) => Some(chain),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bytes(bytes) => serializer.serialize_bytes(bytes),
            Value::Text(text) => serializer.serialize_str(text),
            Value::Token(token) => serializer.serialize_str(token),
            Value::Port(port) => serializer.serialize_u16(*port),
            Value::Map(map) => map.serialize(serializer),
            Value::Certificates(chain) => {
                serializer.collect_seq(chain.iter().map(|cert| cert.as_ref()))
            }
        }
    }
}
