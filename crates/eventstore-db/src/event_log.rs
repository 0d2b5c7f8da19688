//! Append-only event log for one event stream.
//!
//! Events are the source of truth. Each aggregate's events carry a
//! version that starts at 1 and increases by one per append; the version is
//! computed by the insert statement itself (`MAX(event_version) + 1`), never
//! by the caller.
//!
//! Two writers appending to the same aggregate at the same time both see
//! the same `MAX` unless something serializes them. With
//! [`VersionGuard::AdvisoryLock`] every append first takes a
//! transaction-scoped advisory lock keyed on the table and aggregate id, so
//! appends to one aggregate queue up while appends to different aggregates
//! still run in parallel. The lock only helps at `READ COMMITTED`, where the
//! insert's `MAX` sees appends committed while it waited; guarded appends in
//! a stricter transaction are refused.
//!
//! All reads order by `event_version`. `event_time` is caller-supplied wall
//! clock time and says nothing about order.

use chrono::{DateTime, Utc};
use eventstore_types::{AggregateId, Event, EventId, NewEvent};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::StoreError;
use crate::stream::StreamName;

/// Columns selected for every event read, in [`EventRow`] order.
const EVENT_COLUMNS: &str = "event_id, aggregate_id, event_type, event_version, event_data, event_time";

/// How concurrent writers to the same aggregate are kept apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionGuard {
    /// Take `pg_advisory_xact_lock` on `(table, aggregate_id)` before
    /// computing the next version. Versions stay gapless under concurrent
    /// writers.
    #[default]
    AdvisoryLock,
    /// Compute the next version without any lock. Concurrent writers to one
    /// aggregate can be assigned the same version; callers must serialize
    /// them themselves.
    Unguarded,
}

/// The only isolation level under which the advisory lock keeps versions
/// unique. At `REPEATABLE READ` and above the snapshot is taken before the
/// lock is granted, so `MAX(version)` misses appends committed meanwhile.
pub(crate) const GUARDED_ISOLATION: &str = "read committed";

/// Block until no other transaction holds the write lock for `key`.
///
/// The lock is released when the surrounding transaction ends, so this is
/// only meaningful inside one. Fails with [`StoreError::Isolation`] unless the
/// transaction runs at `READ COMMITTED`.
pub(crate) async fn lock_key(
    conn: &mut PgConnection,
    key: &str,
    operation: &'static str,
    aggregate_id: AggregateId,
) -> Result<(), StoreError> {
    let isolation: String = sqlx::query_scalar(
        r"SELECT current_setting('transaction_isolation')
          FROM (SELECT pg_advisory_xact_lock(hashtextextended($1, 0))) AS locked",
    )
    .bind(key)
    .fetch_one(conn)
    .await
    .map_err(StoreError::storage(operation, aggregate_id))?;

    if isolation == GUARDED_ISOLATION {
        Ok(())
    } else {
        Err(StoreError::Isolation {
            operation,
            aggregate_id,
            found: isolation,
        })
    }
}

/// Operations on the `<stream>_events` table.
#[derive(Debug, Clone)]
pub struct EventLog {
    table: String,
    guard: VersionGuard,
    insert_sql: String,
    load_all_sql: String,
    load_range_sql: String,
    load_newest_sql: String,
}

impl EventLog {
    /// Bind the event log to `stream`'s events table.
    pub fn new(stream: &StreamName, guard: VersionGuard) -> Self {
        let table = stream.events_table();
        Self {
            insert_sql: format!(
                r"INSERT INTO {table} (event_id, aggregate_id, event_type, event_version, event_data, event_time)
                  VALUES ($1, $2, $3,
                          COALESCE((SELECT MAX(event_version) FROM {table} WHERE aggregate_id = $2), 0) + 1,
                          $4, $5)
                  RETURNING {EVENT_COLUMNS}"
            ),
            load_all_sql: format!(
                r"SELECT {EVENT_COLUMNS} FROM {table}
                  WHERE aggregate_id = $1
                  ORDER BY event_version ASC"
            ),
            load_range_sql: format!(
                r"SELECT {EVENT_COLUMNS} FROM {table}
                  WHERE aggregate_id = $1 AND event_version >= $2 AND event_version <= $3
                  ORDER BY event_version ASC"
            ),
            load_newest_sql: format!(
                r"SELECT {EVENT_COLUMNS} FROM {table}
                  WHERE aggregate_id = $1 AND event_version > $2
                  ORDER BY event_version ASC"
            ),
            table,
            guard,
        }
    }

    /// The guard applied to appends.
    pub const fn guard(&self) -> VersionGuard {
        self.guard
    }

    /// Append `event` with the next version for its aggregate.
    ///
    /// Must run inside a transaction: the advisory lock, when enabled, is
    /// held until that transaction ends. A guarded append also requires the
    /// transaction to run at `READ COMMITTED`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Isolation`] if guarded and the transaction runs
    /// at a stricter isolation level, or [`StoreError::Storage`] if the lock
    /// or insert fails.
    pub async fn store_event(
        &self,
        conn: &mut PgConnection,
        event: &NewEvent,
    ) -> Result<Event, StoreError> {
        if self.guard == VersionGuard::AdvisoryLock {
            let key = format!("{}:{}", self.table, event.aggregate_id);
            lock_key(&mut *conn, &key, "store_event", event.aggregate_id).await?;
        }

        let row = sqlx::query_as::<_, EventRow>(&self.insert_sql)
            .bind(EventId::new().into_inner())
            .bind(event.aggregate_id.into_inner())
            .bind(&event.event_type)
            .bind(&event.event_data)
            .bind(event.event_time)
            .fetch_one(conn)
            .await
            .map_err(StoreError::storage("store_event", event.aggregate_id))?;

        let stored = Event::from(row);
        tracing::debug!(
            aggregate_id = %stored.aggregate_id,
            event_type = %stored.event_type,
            event_version = stored.event_version,
            "Stored event"
        );
        Ok(stored)
    }

    /// All events of `aggregate_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the query fails.
    pub async fn load_all_events(
        &self,
        conn: &mut PgConnection,
        aggregate_id: AggregateId,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&self.load_all_sql)
            .bind(aggregate_id.into_inner())
            .fetch_all(conn)
            .await
            .map_err(StoreError::storage("load_all_events", aggregate_id))?;

        Ok(rows.into_iter().map(Event::from).collect())
    }

    /// Events of `aggregate_id` with `from <= version <= to`, oldest first.
    ///
    /// Empty when `from > to`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the query fails.
    pub async fn load_events_range(
        &self,
        conn: &mut PgConnection,
        aggregate_id: AggregateId,
        from_version: i64,
        to_version: i64,
    ) -> Result<Vec<Event>, StoreError> {
        if from_version > to_version {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, EventRow>(&self.load_range_sql)
            .bind(aggregate_id.into_inner())
            .bind(from_version)
            .bind(to_version)
            .fetch_all(conn)
            .await
            .map_err(StoreError::storage("load_events_range", aggregate_id))?;

        Ok(rows.into_iter().map(Event::from).collect())
    }

    /// Events of `aggregate_id` with `version > since_version`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the query fails.
    pub async fn load_newest_events(
        &self,
        conn: &mut PgConnection,
        aggregate_id: AggregateId,
        since_version: i64,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&self.load_newest_sql)
            .bind(aggregate_id.into_inner())
            .bind(since_version)
            .fetch_all(conn)
            .await
            .map_err(StoreError::storage("load_newest_events", aggregate_id))?;

        Ok(rows.into_iter().map(Event::from).collect())
    }
}

/// A row from a `<stream>_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Event identifier.
    pub event_id: Uuid,
    /// Owning aggregate.
    pub aggregate_id: Uuid,
    /// Type tag.
    pub event_type: String,
    /// Aggregate-scoped version.
    pub event_version: i64,
    /// Opaque payload.
    pub event_data: Vec<u8>,
    /// Caller-supplied event time.
    pub event_time: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            event_id: EventId::from(row.event_id),
            aggregate_id: AggregateId::from(row.aggregate_id),
            event_type: row.event_type,
            event_version: row.event_version,
            event_data: row.event_data,
            event_time: row.event_time,
        }
    }
}
