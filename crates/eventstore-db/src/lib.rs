//! `PostgreSQL` persistence for event-sourced aggregates.
//!
//! Events are the source of truth; snapshots are a replay shortcut. Each
//! named event stream gets its own pair of tables, created on first open.
//!
//! # Architecture
//!
//! ```text
//! EventStore (one transaction per call)
//!     |
//!     +-- StreamName ----> <stream>_events / <stream>_snapshots
//!     +-- schema --------> CREATE TABLE / INDEX (idempotent), CLUSTER on creation
//!     +-- EventLog ------> append with next version, ordered reads
//!     +-- SnapshotStore -> append with next snapshot version, latest/exact reads
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`stream`] -- Event stream names and the tables derived from them
//! - [`schema`] -- Table and index creation
//! - [`event_log`] -- Event appends and ordered reads
//! - [`snapshot_store`] -- Snapshot appends and lookups
//! - [`store`] -- The transactional facade and replay
//! - [`error`] -- Shared error types

pub mod error;
pub mod event_log;
pub mod postgres;
pub mod schema;
pub mod snapshot_store;
pub mod store;
pub mod stream;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use event_log::{EventLog, EventRow, VersionGuard};
pub use postgres::{PostgresConfig, PostgresPool};
pub use snapshot_store::{SnapshotDraft, SnapshotRow, SnapshotStore};
pub use store::{EventStore, StoreOptions};
pub use stream::{MAX_STREAM_NAME_LEN, StreamName};
