//! Event payloads and the `_from` / `_to` envelope.
//!
//! Every payload that leaves a client is an object. Scalars (strings, numbers,
//! booleans, null, arrays) are boxed as `{ "data": <value>, "altered": true }`
//! before the envelope fields are attached, and [`Payload::unboxed`] reverses
//! that on the receiving side.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope field carrying the sender's client name.
pub const FROM_FIELD: &str = "_from";

/// Envelope field carrying the target client name (`null` for broadcast).
pub const TO_FIELD: &str = "_to";

/// Field holding the original value of a boxed scalar.
pub const BOXED_DATA_FIELD: &str = "data";

/// Marker set on boxed scalars.
pub const BOXED_MARKER_FIELD: &str = "altered";

/// An event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Payload {
    /// A JSON object.
    Structured(Map<String, Value>),
    /// Anything that is not a JSON object.
    Scalar(Value),
}

impl Payload {
    /// An empty object payload.
    #[must_use]
    pub fn empty() -> Self {
        Payload::Structured(Map::new())
    }

    /// Whether this payload is a JSON object.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Structured(_))
    }

    /// Borrow the payload as an object, if it is one.
    #[must_use]
    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Structured(map) => Some(map),
            Payload::Scalar(_) => None,
        }
    }

    /// Look up a top-level field of an object payload.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Convert into an object, boxing scalars.
    #[must_use]
    pub fn into_boxed(self) -> Map<String, Value> {
        match self {
            Payload::Structured(map) => map,
            Payload::Scalar(value) => {
                let mut map = Map::with_capacity(4);
                map.insert(BOXED_DATA_FIELD.to_string(), value);
                map.insert(BOXED_MARKER_FIELD.to_string(), Value::Bool(true));
                map
            }
        }
    }

    /// Box the payload and attach `_to` and `_from`.
    ///
    /// Both fields are always present afterwards; `None` becomes `null`.
    #[must_use]
    pub fn with_envelope(self, from: Option<&str>, to: Option<&str>) -> Self {
        let mut map = self.into_boxed();
        map.insert(TO_FIELD.to_string(), optional_string(to));
        map.insert(FROM_FIELD.to_string(), optional_string(from));
        Payload::Structured(map)
    }

    /// The `_from` field, when it is a string.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.get(FROM_FIELD).and_then(Value::as_str)
    }

    /// The `_to` field, when it is a string.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.get(TO_FIELD).and_then(Value::as_str)
    }

    /// Whether this is a boxed scalar.
    #[must_use]
    pub fn is_altered(&self) -> bool {
        matches!(self.get(BOXED_MARKER_FIELD), Some(Value::Bool(true)))
    }

    /// The value the sender originally passed.
    ///
    /// For a boxed scalar this is the `data` field; otherwise the payload as
    /// a JSON value, envelope fields included.
    #[must_use]
    pub fn unboxed(&self) -> Value {
        if self.is_altered() {
            return self.get(BOXED_DATA_FIELD).cloned().unwrap_or(Value::Null);
        }
        self.clone().into_value()
    }

    /// Convert into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Payload::Structured(map) => Value::Object(map),
            Payload::Scalar(value) => value,
        }
    }
}

fn optional_string(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.to_string()))
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Payload::Structured(map),
            other => Payload::Scalar(other),
        }
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        payload.into_value()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload::Structured(map)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Scalar(Value::String(s.to_string()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Scalar(Value::String(s))
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Scalar(Value::from(n))
    }
}

impl From<f64> for Payload {
    fn from(n: f64) -> Self {
        Payload::Scalar(Value::from(n))
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Scalar(Value::Bool(b))
    }
}
