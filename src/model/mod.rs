//! Value model: row keys, row values and key ranges.
//!
//! ```text
//! Row = (Key, Datum)
//! KeyRange = [lower, upper] with optional open sides
//! ```

pub mod datum;
pub mod key;
pub(crate) mod number;
pub mod range;

pub use datum::Datum;
pub use key::Key;
pub use range::KeyRange;
