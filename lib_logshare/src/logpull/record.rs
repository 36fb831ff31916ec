//! # Log Record
//!
//! One decoded line of a Logpull response. The set of fields is chosen by the
//! caller and grows as the API adds fields, so the record keeps the raw JSON
//! object and offers typed accessors that are evaluated lazily on lookup.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRecord {
    fields: Map<String, Value>,
}

impl LogRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// The `RayID` field, present in every record that selects it.
    pub fn ray_id(&self) -> Option<&str> {
        self.get_str("RayID")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    /// Deserializes a single field into `T`.
    ///
    /// Returns `None` when the field is absent and `Some(Err(_))` when it is
    /// present but has the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Option<serde_json::Result<T>> {
        self.get(field).map(|v| T::deserialize(v))
    }

    /// Deserializes the whole record into a caller-defined struct.
    pub fn to_typed<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&Value::Object(self.fields.clone()))
    }

    /// Field names in the order the API sent them.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Name and raw value of every field.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Gives up the underlying JSON object.
    pub fn into_inner(self) -> Map<String, Value> {
        self.fields
    }

    /// Serializes the record back to a single NDJSON line, without the newline.
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.fields)
    }
}

impl From<Map<String, Value>> for LogRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}
