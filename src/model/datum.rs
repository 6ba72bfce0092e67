//! Row values.
//!
//! A [`Datum`] is the value half of a row. The storage layer never looks
//! inside it; it is stored and returned as given. An explicit
//! [`Datum::Null`] is a stored value, which is different from an absent row
//! (`None` in the row APIs).
//!
//! Values render as compact JSON, with integral numbers printed without a
//! fractional part:
//!
//! ```rust
//! use tablekv::model::Datum;
//!
//! let user = Datum::parse(r#"{"name": "Ada", "age": 36}"#);
//! assert_eq!(user.to_string(), r#"{"age":36,"name":"Ada"}"#);
//!
//! // Text that is not JSON is kept as a string
//! assert_eq!(Datum::parse("hello"), Datum::from("hello"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A stored row value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Datum>),
    /// Fields are kept sorted so rendering is deterministic
    Object(BTreeMap<String, Datum>),
}

impl Datum {
    /// Reads `text` as JSON, falling back to a plain string.
    pub fn parse(text: &str) -> Self {
        serde_json::from_str::<serde_json::Value>(text)
            .map(Datum::from)
            .unwrap_or_else(|_| Datum::String(text.to_string()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Datum::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Datum]> {
        match self {
            Datum::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Datum>> {
        match self {
            Datum::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field lookup on objects; `None` for anything else.
    pub fn field(&self, name: &str) -> Option<&Datum> {
        self.as_object().and_then(|fields| fields.get(name))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Boolean(_) => "boolean",
            Datum::Number(_) => "number",
            Datum::String(_) => "string",
            Datum::Array(_) => "array",
            Datum::Object(_) => "object",
        }
    }

    /// JSON form. Non-finite numbers become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            Datum::Null => Value::Null,
            Datum::Boolean(b) => Value::Bool(*b),
            Datum::Number(n) => number_to_json(*n),
            Datum::String(s) => Value::String(s.clone()),
            Datum::Array(items) => Value::Array(items.iter().map(Datum::to_json).collect()),
            Datum::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Integral values inside the exactly-representable range print as integers.
fn number_to_json(n: f64) -> serde_json::Value {
    const EXACT: f64 = 9_007_199_254_740_992.0; // 2^53

    if n.is_finite() && n.fract() == 0.0 && n.abs() <= EXACT {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Boolean(b)
    }
}

impl From<i32> for Datum {
    fn from(n: i32) -> Self {
        Datum::Number(f64::from(n))
    }
}

impl From<f64> for Datum {
    fn from(n: f64) -> Self {
        Datum::Number(n)
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::String(s)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::String(s.to_string())
    }
}

impl From<Vec<Datum>> for Datum {
    fn from(items: Vec<Datum>) -> Self {
        Datum::Array(items)
    }
}

impl From<serde_json::Value> for Datum {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Datum::Null,
            Value::Bool(b) => Datum::Boolean(b),
            Value::Number(n) => n.as_f64().map_or(Datum::Null, Datum::Number),
            Value::String(s) => Datum::String(s),
            Value::Array(items) => Datum::Array(items.into_iter().map(Datum::from).collect()),
            Value::Object(fields) => Datum::Object(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, Datum::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<Datum> for serde_json::Value {
    fn from(datum: Datum) -> Self {
        datum.to_json()
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_conversion() {
        let value = serde_json::json!({"name": "Alice", "tags": ["a", "b"], "age": 30});
        let datum = Datum::from(value.clone());

        assert_eq!(datum.field("name").and_then(Datum::as_str), Some("Alice"));
        assert_eq!(datum.field("age").and_then(Datum::as_number), Some(30.0));
        assert_eq!(datum.field("tags").and_then(Datum::as_array).map(<[Datum]>::len), Some(2));
        assert_eq!(datum.to_json(), value);
    }

    #[test]
    fn test_rendering() {
        let datum = Datum::from(vec![Datum::from(1), Datum::from(2.5), Datum::from("x"), Datum::Null]);
        assert_eq!(datum.to_string(), r#"[1,2.5,"x",null]"#);
        assert!(Datum::Number(f64::INFINITY).to_json().is_null());
    }

    #[test]
    fn test_parse_falls_back_to_string() {
        assert_eq!(Datum::parse("42"), Datum::Number(42.0));
        assert_eq!(Datum::parse("true"), Datum::Boolean(true));
        assert_eq!(Datum::parse("not json"), Datum::from("not json"));
        assert_eq!(Datum::parse("\"quoted\""), Datum::from("quoted"));
    }

    #[test]
    fn test_type_name() {
        assert_eq!(Datum::Null.type_name(), "null");
        assert_eq!(Datum::parse("{}").type_name(), "object");
        assert!(Datum::Null.is_null());
        assert_eq!(Datum::from(false).as_bool(), Some(false));
    }
}
