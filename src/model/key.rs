//! Row keys.
//!
//! Keys are ordered across types the same way the engine orders them:
//!
//! ```text
//! Number < Date < String < Binary < Array
//! ```
//!
//! Numbers compare numerically (`-0` and `0` are the same key), dates chronologically, strings by code
//! point, binary keys byte-wise, and arrays element by element with the
//! shorter array first when one is a prefix of the other.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// A row key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Key {
    /// Non-finite values are written as `"Infinity"` / `"-Infinity"`
    Number(#[serde(with = "super::number")] f64),
    Date(DateTime<Utc>),
    String(String),
    Binary(Bytes),
    Array(Vec<Key>),
}

impl Key {
    /// Rank of the key's type in the cross-type ordering.
    fn type_rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    /// Checks that the key can be stored.
    ///
    /// `NaN` numbers are not valid keys, at any nesting depth.
    pub fn validate(&self) -> Result<()> {
        match self {
            Key::Number(n) if n.is_nan() => {
                Err(Error::InvalidArgument("NaN is not a valid key".to_string()))
            }
            Key::Array(items) => items.iter().try_for_each(Key::validate),
            _ => Ok(()),
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // NaN never passes `validate`; total_cmp only orders it
            (Key::Number(a), Key::Number(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Key::Date(a), Key::Date(b)) => a.cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(if n == 0.0 { 0.0 } else { n })
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<DateTime<Utc>> for Key {
    fn from(date: DateTime<Utc>) -> Self {
        Key::Date(date)
    }
}

impl From<Bytes> for Key {
    fn from(bytes: Bytes) -> Self {
        Key::Binary(bytes)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Key::String(s) => write!(f, "\"{}\"", s),
            Key::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cross_type_ordering() {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut keys = vec![
            Key::Array(vec![]),
            Key::Binary(Bytes::from_static(b"\x00")),
            Key::from("a"),
            Key::Date(date),
            Key::from(1000),
        ];
        keys.sort();

        assert!(matches!(keys[0], Key::Number(_)));
        assert!(matches!(keys[1], Key::Date(_)));
        assert!(matches!(keys[2], Key::String(_)));
        assert!(matches!(keys[3], Key::Binary(_)));
        assert!(matches!(keys[4], Key::Array(_)));
    }

    #[test]
    fn test_array_ordering() {
        let short = Key::from(vec![Key::from(1), Key::from("a")]);
        let long = Key::from(vec![Key::from(1), Key::from("a"), Key::from(0)]);
        let bigger = Key::from(vec![Key::from(2)]);

        assert!(short < long);
        assert!(long < bigger);
    }

    #[test]
    fn test_validate_rejects_nan() {
        assert!(Key::from(1.5).validate().is_ok());
        assert!(Key::Number(f64::NAN).validate().is_err());
        assert!(Key::from(vec![Key::from("x"), Key::Number(f64::NAN)])
            .validate()
            .is_err());
    }

    #[test]
    fn test_signed_zero_is_one_key() {
        assert_eq!(Key::Number(-0.0), Key::Number(0.0));
        assert_eq!(Key::from(-0.0).to_string(), "0");

        let mut rows = std::collections::BTreeMap::new();
        rows.insert(Key::Number(-0.0), 1);
        rows.insert(Key::from(0.0), 2);
        assert_eq!(rows.len(), 1);
        assert!(Key::from(-1.0) < Key::Number(-0.0));
    }

    #[test]
    fn test_infinite_keys_serialize() {
        let key = Key::from(vec![Key::from(f64::NEG_INFINITY), Key::from(f64::INFINITY)]);
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains("\"-Infinity\""));
        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(Key::from(f64::INFINITY).validate().is_ok());
    }

    #[test]
    fn test_serde_keeps_type() {
        let key = Key::from(vec![Key::from(3), Key::from("3")]);
        let json = serde_json::to_string(&key).unwrap();
        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(matches!(back, Key::Array(ref items) if matches!(items[1], Key::String(_))));
    }
}
