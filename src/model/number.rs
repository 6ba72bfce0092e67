//! Lossless serde form for `f64`.
//!
//! JSON has no literal for the non-finite floats, and `serde_json` writes
//! them as `null`. Here finite values stay JSON numbers while the others are
//! written as the strings `"NaN"`, `"Infinity"` and `"-Infinity"`.
//!
//! Use it on a field with `#[serde(with = "crate::model::number")]`.

use serde::de::{self, Deserializer, Unexpected};
use serde::{Deserialize, Serializer};

const NAN: &str = "NaN";
const INFINITY: &str = "Infinity";
const NEG_INFINITY: &str = "-Infinity";

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Finite(f64),
    Named(String),
}

pub(crate) fn serialize<S: Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if n.is_nan() {
        serializer.serialize_str(NAN)
    } else if *n == f64::INFINITY {
        serializer.serialize_str(INFINITY)
    } else if *n == f64::NEG_INFINITY {
        serializer.serialize_str(NEG_INFINITY)
    } else {
        serializer.serialize_f64(*n)
    }
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Repr::deserialize(deserializer)? {
        Repr::Finite(n) => Ok(n),
        Repr::Named(name) => match name.as_str() {
            NAN => Ok(f64::NAN),
            INFINITY => Ok(f64::INFINITY),
            NEG_INFINITY => Ok(f64::NEG_INFINITY),
            _ => Err(de::Error::invalid_value(
                Unexpected::Str(&name),
                &"a number, \"NaN\", \"Infinity\" or \"-Infinity\"",
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Wrapped(#[serde(with = "super")] f64);

    fn round_trip(n: f64) -> f64 {
        let json = serde_json::to_string(&Wrapped(n)).unwrap();
        serde_json::from_str::<Wrapped>(&json).unwrap().0
    }

    #[test]
    fn test_non_finite_survive() {
        assert_eq!(round_trip(f64::INFINITY), f64::INFINITY);
        assert_eq!(round_trip(f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert!(round_trip(f64::NAN).is_nan());
        assert_eq!(round_trip(-2.5), -2.5);
        assert_eq!(serde_json::to_string(&Wrapped(f64::INFINITY)).unwrap(), "\"Infinity\"");
    }

    #[test]
    fn test_unknown_name_rejected() {
        assert!(serde_json::from_str::<Wrapped>("\"Infinite\"").is_err());
        assert!(serde_json::from_str::<Wrapped>("null").is_err());
    }
}
