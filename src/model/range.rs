//! Key ranges.
//!
//! A [`KeyRange`] is the engine's native filter predicate. The storage layer
//! never interprets it; it is handed unchanged to `count` and the cursor
//! openers of an [`ObjectStore`](crate::engine::ObjectStore).

use serde::{Deserialize, Serialize};
use std::ops::Bound;

use super::Key;
use crate::error::{Error, Result};

/// A contiguous interval of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// A range matching exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// All keys above `key` (excluding it when `open`).
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Some(key.into()),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    /// All keys below `key` (excluding it when `open`).
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(key.into()),
            lower_open: false,
            upper_open: open,
        }
    }

    /// Keys between `lower` and `upper`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when `lower > upper`, or when the
    /// bounds are equal and either side is open (an empty range).
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self> {
        let lower = lower.into();
        let upper = upper.into();

        if lower > upper {
            return Err(Error::InvalidArgument(format!(
                "Lower bound {} is greater than upper bound {}",
                lower, upper
            )));
        }
        if lower == upper && (lower_open || upper_open) {
            return Err(Error::InvalidArgument(format!(
                "Range on {} with an open side is empty",
                lower
            )));
        }

        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    /// Lower bound in the form `BTreeMap::range` expects.
    pub fn start_bound(&self) -> Bound<Key> {
        match &self.lower {
            Some(key) if self.lower_open => Bound::Excluded(key.clone()),
            Some(key) => Bound::Included(key.clone()),
            None => Bound::Unbounded,
        }
    }

    /// True when `key` is not above the upper bound.
    pub fn below_upper(&self, key: &Key) -> bool {
        match &self.upper {
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
            None => true,
        }
    }

    /// True when `key` is not below the lower bound.
    pub fn above_lower(&self, key: &Key) -> bool {
        match &self.lower {
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
            None => true,
        }
    }

    /// True when `key` lies inside the range.
    pub fn includes(&self, key: &Key) -> bool {
        self.above_lower(key) && self.below_upper(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only() {
        let range = KeyRange::only("b");
        assert!(range.includes(&Key::from("b")));
        assert!(!range.includes(&Key::from("a")));
        assert!(!range.includes(&Key::from("c")));
    }

    #[test]
    fn test_bound_open_sides() -> Result<()> {
        let range = KeyRange::bound(0, 100, true, false)?;
        assert!(!range.includes(&Key::from(0)));
        assert!(range.includes(&Key::from(1)));
        assert!(range.includes(&Key::from(100)));
        assert!(!range.includes(&Key::from(101)));
        // Strings sort after every number
        assert!(!range.includes(&Key::from("50")));
        Ok(())
    }

    #[test]
    fn test_bound_rejects_empty_ranges() {
        assert!(KeyRange::bound(5, 1, false, false).is_err());
        assert!(KeyRange::bound(5, 5, true, false).is_err());
        assert!(KeyRange::bound(5, 5, false, false).is_ok());
    }

    #[test]
    fn test_half_open() {
        let lower = KeyRange::lower_bound("m", true);
        assert!(!lower.includes(&Key::from("m")));
        assert!(lower.includes(&Key::from("n")));

        let upper = KeyRange::upper_bound("m", false);
        assert!(upper.includes(&Key::from("m")));
        assert!(!upper.includes(&Key::from("n")));
        assert_eq!(upper.start_bound(), Bound::Unbounded);
    }
}
