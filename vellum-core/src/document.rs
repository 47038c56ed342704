//! Document identity and the stored-document wrapper.

use crate::value::{Object, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A document identifier. Rendered on the wire as a lowercase-hex UUID
/// string. Never reassigned by `apply` -- ids travel with the batch that
/// minted them (see `vellum_core::apply`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Id(Uuid::new_v4())
    }

    pub fn from_uuid(u: Uuid) -> Self {
        Id(u)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Id::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Id)
    }
}

/// A document as stored: its id, the OCC version it was last written at,
/// and its body. `_id`/`_version` are injected into the JSON view
/// returned to clients but are not duplicated inside `body`.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: Id,
    pub version: u64,
    pub body: Value,
}

impl Document {
    pub fn new(id: Id, version: u64, body: Value) -> Self {
        Document { id, version, body }
    }

    /// Renders the document as the client-facing JSON shape, with `_id`
    /// and `_version` merged into the top-level object.
    pub fn to_client_value(&self) -> Value {
        let mut obj = match &self.body {
            Value::Object(o) => o.clone(),
            other => {
                // Non-object bodies are rejected at insert time; this is
                // unreachable in practice but keeps the conversion total.
                let mut o = Object::new();
                o.insert("value", other.clone());
                o
            }
        };
        obj.insert("_id", Value::String(self.id.to_string()));
        obj.insert("_version", Value::Int(self.version as i64));
        Value::Object(obj)
    }
}

/// Strips `_id`/`_version` from a client-supplied insert body, if present,
/// so the stored body never duplicates injected metadata.
pub fn strip_metadata(mut body: Value) -> Value {
    if let Value::Object(obj) = &mut body {
        obj.remove("_id");
        obj.remove("_version");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrips_through_display_and_parse() {
        let id = Id::new();
        let parsed: Id = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn client_value_injects_metadata() {
        let mut obj = Object::new();
        obj.insert("name", Value::String("a".into()));
        let doc = Document::new(Id::new(), 3, Value::Object(obj));
        let v = doc.to_client_value();
        assert_eq!(v.get_path("_version"), Some(&Value::Int(3)));
        assert_eq!(v.get_path("name"), Some(&Value::String("a".into())));
    }

    #[test]
    fn strip_metadata_removes_injected_fields() {
        let mut obj = Object::new();
        obj.insert("_id", Value::String("x".into()));
        obj.insert("_version", Value::Int(1));
        obj.insert("name", Value::String("a".into()));
        let stripped = strip_metadata(Value::Object(obj));
        assert!(stripped.get_path("_id").is_none());
        assert!(stripped.get_path("_version").is_none());
        assert_eq!(stripped.get_path("name"), Some(&Value::String("a".into())));
    }
}
