//! Error types for the demo binary.
//!
//! [`DemoError`] wraps every failure the demo can hit so `main` can
//! propagate with `?` and report through `anyhow`.

use eventstore_db::StoreError;

/// Top-level error for the demo binary.
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    /// Settings could not be read or deserialized.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: config::ConfigError,
    },

    /// Settings were read but failed validation.
    #[error("invalid settings: {source}")]
    Validation {
        /// The failed rules.
        #[from]
        source: validator::ValidationErrors,
    },

    /// An event store operation failed.
    #[error("event store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A simulation worker did not finish.
    #[error("simulation error: {message}")]
    Simulation {
        /// Description of the worker failure.
        message: String,
    },
}
