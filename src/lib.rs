// tablekv - awaitable database/table/row layer over an event-driven
// key-value engine

#![warn(rust_2018_idioms)]

pub mod config;
pub mod engine;
pub mod model;
pub mod request;
pub mod storage;

// Re-exports for convenience
pub use config::EngineConfig;
pub use engine::{MemoryEngine, StorageEngine};
pub use model::{Datum, Key, KeyRange};
pub use request::Request;
pub use storage::{Database, Page, Storage, Table, TableChange};

/// tablekv error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum Error {
        #[error("Not found: {0}")]
        NotFound(String),

        #[error(
            "Upgrade of database '{database}' from version {old_version} to {new_version} is blocked by another open connection"
        )]
        BlockedUpgrade {
            database: String,
            old_version: u64,
            new_version: u64,
        },

        #[error("Database '{database}' is at version {current}, cannot open at version {requested}")]
        Version {
            database: String,
            requested: u64,
            current: u64,
        },

        #[error("Invalid state: {0}")]
        InvalidState(String),

        #[error("Read-only transaction: {0}")]
        ReadOnly(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Aborted: {0}")]
        Aborted(String),

        #[error("Request dropped before completion: {0}")]
        RequestDropped(String),

        #[error("Storage error: {0}")]
        Storage(String),

        #[error("Serialization error: {0}")]
        SerializationError(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl Error {
        /// True for the soft "no such table/database/row" outcome.
        pub fn is_not_found(&self) -> bool {
            matches!(self, Error::NotFound(_))
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(VERSION.split('.').count() >= 3);
    }

    #[test]
    fn test_blocked_error_message() {
        let err = error::Error::BlockedUpgrade {
            database: "d".to_string(),
            old_version: 1,
            new_version: 2,
        };
        assert!(err.to_string().contains("blocked"));
        assert!(!err.is_not_found());
    }
}
