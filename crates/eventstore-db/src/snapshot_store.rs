//! Snapshot persistence for one event stream.
//!
//! Snapshots are keyed by `(aggregate_id, aggregate_type)` because one
//! stream can host several aggregate kinds. Each new snapshot gets the next
//! `snapshot_version` for its key; older snapshots are kept and simply
//! shadowed by the newest one.

use chrono::{DateTime, Utc};
use eventstore_types::{AggregateId, Snapshot, SnapshotId};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::StoreError;
use crate::event_log::{VersionGuard, lock_key};
use crate::stream::StreamName;

/// Columns selected for every snapshot read, in [`SnapshotRow`] order.
const SNAPSHOT_COLUMNS: &str = "snapshot_id, aggregate_id, aggregate_type, snapshot_version, \
                                snapshot_data, snapshot_time, latest_event_version";

/// A snapshot that has not been persisted yet.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotDraft<'a> {
    /// The aggregate the state belongs to.
    pub aggregate_id: AggregateId,
    /// Kind tag of the aggregate.
    pub aggregate_type: &'a str,
    /// Serialized state.
    pub data: &'a [u8],
    /// When the snapshot was taken.
    pub time: DateTime<Utc>,
    /// The event version the state reflects.
    pub latest_event_version: i64,
}

/// Operations on the `<stream>_snapshots` table.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    table: String,
    guard: VersionGuard,
    insert_sql: String,
    load_latest_sql: String,
    load_sql: String,
}

impl SnapshotStore {
    /// Bind the snapshot store to `stream`'s snapshot table.
    pub fn new(stream: &StreamName, guard: VersionGuard) -> Self {
        let table = stream.snapshots_table();
        Self {
            insert_sql: format!(
                r"INSERT INTO {table} (snapshot_id, aggregate_id, aggregate_type, snapshot_version, snapshot_data, snapshot_time, latest_event_version)
                  VALUES ($1, $2, $3,
                          COALESCE((SELECT MAX(snapshot_version) FROM {table}
                                    WHERE aggregate_id = $2 AND aggregate_type = $3), 0) + 1,
                          $4, $5, $6)
                  RETURNING {SNAPSHOT_COLUMNS}"
            ),
            load_latest_sql: format!(
                r"SELECT {SNAPSHOT_COLUMNS} FROM {table}
                  WHERE aggregate_id = $1 AND aggregate_type = $2
                  ORDER BY snapshot_version DESC
                  LIMIT 1"
            ),
            load_sql: format!(
                r"SELECT {SNAPSHOT_COLUMNS} FROM {table}
                  WHERE aggregate_id = $1 AND aggregate_type = $2 AND snapshot_version = $3"
            ),
            table,
            guard,
        }
    }

    /// The newest snapshot of `aggregate_id` / `aggregate_type`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the aggregate was never
    /// snapshotted, or [`StoreError::Storage`] if the query fails.
    pub async fn load_latest_snapshot(
        &self,
        conn: &mut PgConnection,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Snapshot, StoreError> {
        let operation = "load_latest_snapshot";
        let row = sqlx::query_as::<_, SnapshotRow>(&self.load_latest_sql)
            .bind(aggregate_id.into_inner())
            .bind(aggregate_type)
            .fetch_optional(conn)
            .await
            .map_err(StoreError::storage(operation, aggregate_id))?;

        row.map(Snapshot::from).ok_or_else(|| StoreError::NotFound {
            operation,
            aggregate_id,
            aggregate_type: aggregate_type.to_owned(),
        })
    }

    /// The snapshot with exactly `snapshot_version`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such snapshot exists, or
    /// [`StoreError::Storage`] if the query fails.
    pub async fn load_snapshot(
        &self,
        conn: &mut PgConnection,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        snapshot_version: i64,
    ) -> Result<Snapshot, StoreError> {
        let operation = "load_snapshot";
        let row = sqlx::query_as::<_, SnapshotRow>(&self.load_sql)
            .bind(aggregate_id.into_inner())
            .bind(aggregate_type)
            .bind(snapshot_version)
            .fetch_optional(conn)
            .await
            .map_err(StoreError::storage(operation, aggregate_id))?;

        row.map(Snapshot::from).ok_or_else(|| StoreError::NotFound {
            operation,
            aggregate_id,
            aggregate_type: aggregate_type.to_owned(),
        })
    }

    /// Insert `draft` with the next snapshot version for its key.
    ///
    /// Must run inside a `READ COMMITTED` transaction when the advisory lock
    /// is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Isolation`] if guarded and the transaction runs
    /// at a stricter isolation level, or [`StoreError::Storage`] if the lock
    /// or insert fails.
    pub async fn store_snapshot(
        &self,
        conn: &mut PgConnection,
        draft: SnapshotDraft<'_>,
    ) -> Result<Snapshot, StoreError> {
        let aggregate_id = draft.aggregate_id;
        if self.guard == VersionGuard::AdvisoryLock {
            let key = format!("{}:{}:{}", self.table, aggregate_id, draft.aggregate_type);
            lock_key(&mut *conn, &key, "store_snapshot", aggregate_id).await?;
        }

        let row = sqlx::query_as::<_, SnapshotRow>(&self.insert_sql)
            .bind(SnapshotId::new().into_inner())
            .bind(aggregate_id.into_inner())
            .bind(draft.aggregate_type)
            .bind(draft.data)
            .bind(draft.time)
            .bind(draft.latest_event_version)
            .fetch_one(conn)
            .await
            .map_err(StoreError::storage("store_snapshot", aggregate_id))?;

        let stored = Snapshot::from(row);
        tracing::debug!(
            %aggregate_id,
            aggregate_type = %stored.aggregate_type,
            snapshot_version = stored.snapshot_version,
            latest_event_version = stored.latest_event_version,
            "Stored snapshot"
        );
        Ok(stored)
    }
}

/// A row from a `<stream>_snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    /// Snapshot identifier.
    pub snapshot_id: Uuid,
    /// Owning aggregate.
    pub aggregate_id: Uuid,
    /// Aggregate kind tag.
    pub aggregate_type: String,
    /// Snapshot sequence number for the aggregate and kind.
    pub snapshot_version: i64,
    /// Serialized state.
    pub snapshot_data: Vec<u8>,
    /// When the snapshot was taken.
    pub snapshot_time: DateTime<Utc>,
    /// The event version the state reflects.
    pub latest_event_version: i64,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            snapshot_id: SnapshotId::from(row.snapshot_id),
            aggregate_id: AggregateId::from(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            snapshot_version: row.snapshot_version,
            snapshot_data: row.snapshot_data,
            snapshot_time: row.snapshot_time,
            latest_event_version: row.latest_event_version,
        }
    }
}
