//! Canonical request maps.
//!
//! A [`RequestMap`] is the immutable, closed-vocabulary view of one inbound
//! request that route handlers consume. It is built once at dispatch time by
//! running every [`Field`] rule against the live [`RequestContext`]; fields
//! whose rule yields nothing are left out, so the presence of a key always
//! means it carries a meaningful value.

mod field;
mod form;
mod value;

pub use field::{Field, HEADER_SEPARATOR};
pub use value::Value;

use bytes::Bytes;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use crate::http::RequestContext;

/// Immutable canonical representation of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMap {
    fields: BTreeMap<Field, Value>,
}

impl RequestMap {
    /// Evaluate the whole field catalog against a request.
    pub fn from_context(ctx: &RequestContext) -> Self {
        let fields = Field::ALL
            .into_iter()
            .filter_map(|field| field.extract(ctx).map(|value| (field, value)))
            .collect();
        Self { fields }
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.fields.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Present fields, in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &Value)> {
        self.fields.iter().map(|(field, value)| (*field, value))
    }

    /// Text or token value of a field.
    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.get(Field::Body).and_then(Value::as_bytes)
    }

    /// Folded header value, by lower-case name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.map_entry(Field::Headers, &name.to_ascii_lowercase())
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.map_entry(Field::PathParams, name)
    }

    pub fn form_param(&self, name: &str) -> Option<&str> {
        self.map_entry(Field::FormParams, name)
    }

    fn map_entry(&self, field: Field, key: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_map)
            .and_then(|map| map.get(key))
            .map(String::as_str)
    }
}

impl Serialize for RequestMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, value) in &self.fields {
            map.serialize_entry(field.name(), value)?;
        }
        map.end()
    }
}
