//! Snapshot records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AggregateId, SnapshotId};

/// A materialized cache of an aggregate's state at a known event version.
///
/// Snapshots are never mutated. A newer snapshot supersedes older ones for
/// the same `(aggregate_id, aggregate_type)`, and all of them can be dropped
/// without losing information as long as the events remain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot identifier.
    pub snapshot_id: SnapshotId,
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,
    /// Discriminator for the aggregate's kind within the stream.
    pub aggregate_type: String,
    /// Sequence number of this snapshot for its aggregate and kind.
    pub snapshot_version: i64,
    /// Opaque serialized aggregate state.
    pub snapshot_data: Vec<u8>,
    /// When the snapshot was taken.
    pub snapshot_time: DateTime<Utc>,
    /// The event version the state reflects.
    pub latest_event_version: i64,
}
