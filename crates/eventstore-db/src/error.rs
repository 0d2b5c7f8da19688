//! Error types for the event store.
//!
//! All errors are propagated via [`StoreError`]. Database failures are
//! wrapped with the name of the store operation and the aggregate it was
//! working on, so a log line alone says what broke and for whom.
//!
//! | Variant | Meaning | Retry? |
//! |---------|---------|--------|
//! | `NotFound` | no snapshot for the aggregate and kind | no |
//! | `Contract` | entity and stored data disagree | no |
//! | `Isolation` | guarded write outside `READ COMMITTED` | no |
//! | `Storage`, `Postgres` | database failure | caller's choice |
//! | `Schema`, `InvalidStreamName`, `Config` | store construction failed | no |

use eventstore_types::{AggregateId, EntityError};

/// Errors that can occur in the event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No snapshot exists for the aggregate and kind.
    #[error("{operation}: no {aggregate_type} snapshot for aggregate {aggregate_id}")]
    NotFound {
        /// The store operation that was running.
        operation: &'static str,
        /// The aggregate that was looked up.
        aggregate_id: AggregateId,
        /// The aggregate kind that was looked up.
        aggregate_type: String,
    },

    /// The entity could not be hydrated or folded from the stored data.
    #[error("{operation} for aggregate {aggregate_id}: contract violation: {source}")]
    Contract {
        /// The store operation that was running.
        operation: &'static str,
        /// The aggregate being processed.
        aggregate_id: AggregateId,
        /// What the entity rejected.
        #[source]
        source: EntityError,
    },

    /// A `PostgreSQL` statement failed while serving an aggregate.
    #[error("{operation} for aggregate {aggregate_id}: PostgreSQL error: {source}")]
    Storage {
        /// The store operation that was running.
        operation: &'static str,
        /// The aggregate being processed.
        aggregate_id: AggregateId,
        /// The underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A guarded write ran in a transaction whose isolation level would let
    /// two writers compute the same version.
    #[error(
        "{operation} for aggregate {aggregate_id}: advisory lock needs READ COMMITTED, transaction is {found}"
    )]
    Isolation {
        /// The store operation that was running.
        operation: &'static str,
        /// The aggregate being written.
        aggregate_id: AggregateId,
        /// The transaction's `transaction_isolation` setting.
        found: String,
    },

    /// Creating the stream's tables failed.
    #[error("schema setup for stream {stream} failed: {source}")]
    Schema {
        /// The normalized stream name.
        stream: String,
        /// The underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The event stream name cannot be used as a table prefix.
    #[error("invalid event stream name {name:?}: {reason}")]
    InvalidStreamName {
        /// The name as supplied.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A `PostgreSQL` operation outside any aggregate failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Wrap a driver error raised by `operation` on `aggregate_id`.
    pub(crate) fn storage(
        operation: &'static str,
        aggregate_id: AggregateId,
    ) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Storage {
            operation,
            aggregate_id,
            source,
        }
    }

    /// Wrap an entity error raised during `operation` on `aggregate_id`.
    pub(crate) fn contract(
        operation: &'static str,
        aggregate_id: AggregateId,
    ) -> impl FnOnce(EntityError) -> Self {
        move |source| Self::Contract {
            operation,
            aggregate_id,
            source,
        }
    }

    /// Whether this is the "never snapshotted" case.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether repeating the call may succeed.
    ///
    /// Only database failures qualify. Pool timeouts and dropped
    /// connections are the usual cases.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Postgres(_))
    }
}
