//! The event store facade: transactions and replay.
//!
//! [`EventStore`] is the only type application code needs. It owns the
//! pool and one stream's [`EventLog`] and [`SnapshotStore`], and wraps every
//! public operation in its own transaction. Write transactions run at
//! `READ COMMITTED` regardless of the session default. A transaction that
//! is dropped before commit is rolled back, so an error anywhere in a write
//! path leaves nothing behind.
//!
//! # Replay
//!
//! ```text
//! latest snapshot ──init──> entity ──load events > latest_event_version──> fold (ascending) ──> current
//!   (none: empty)
//! ```
//!
//! [`EventStore::make_snapshot`] runs the same replay and, if it folded at
//! least one event, stores the result as a new snapshot in the same
//! transaction. With nothing new to fold it writes nothing.

use chrono::{DateTime, Utc};
use eventstore_types::{
    AggregateId, Entity, EntityError, Event, EventPayload, NewEvent, Snapshot, replay,
};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::error::StoreError;
use crate::event_log::{EventLog, VersionGuard};
use crate::postgres::PostgresPool;
use crate::schema;
use crate::snapshot_store::{SnapshotDraft, SnapshotStore};
use crate::stream::StreamName;

/// Options for opening an [`EventStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// How appends to the same aggregate are serialized.
    pub version_guard: VersionGuard,
}

impl StoreOptions {
    /// Set the version guard.
    #[must_use]
    pub const fn with_version_guard(mut self, guard: VersionGuard) -> Self {
        self.version_guard = guard;
        self
    }
}

/// Result of replaying events onto an entity inside a transaction.
struct Replayed<E> {
    entity: E,
    /// Version of the last event folded, `None` if nothing was newer than
    /// the snapshot.
    last_folded: Option<i64>,
}

/// Event store for one named stream.
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: PgPool,
    stream: StreamName,
    events: EventLog,
    snapshots: SnapshotStore,
}

impl EventStore {
    /// Open the store for `stream_name` with default options.
    ///
    /// See [`EventStore::open_with`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the name is invalid, the database is
    /// unreachable, or the tables cannot be created.
    pub async fn open(pool: &PostgresPool, stream_name: &str) -> Result<Self, StoreError> {
        Self::open_with(pool, stream_name, StoreOptions::default()).await
    }

    /// Open the store for `stream_name`, creating its tables if needed.
    ///
    /// The name is normalized to `snake_case` (see [`StreamName::parse`]).
    /// Both tables are created in one transaction; a failure here is fatal
    /// and nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStreamName`] for an unusable name,
    /// [`StoreError::Postgres`] if the database does not answer, and
    /// [`StoreError::Schema`] if table creation fails.
    pub async fn open_with(
        pool: &PostgresPool,
        stream_name: &str,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let stream = StreamName::parse(stream_name)?;
        pool.ping().await?;
        schema::prepare(pool.pool(), &stream).await?;

        tracing::info!(
            %stream,
            version_guard = ?options.version_guard,
            "Event store opened"
        );

        Ok(Self {
            pool: pool.pool().clone(),
            events: EventLog::new(&stream, options.version_guard),
            snapshots: SnapshotStore::new(&stream, options.version_guard),
            stream,
        })
    }

    /// The normalized stream name.
    pub const fn event_stream(&self) -> &StreamName {
        &self.stream
    }

    /// The underlying event log, for running it inside your own transaction.
    pub const fn event_log(&self) -> &EventLog {
        &self.events
    }

    /// The underlying snapshot store, for running it inside your own
    /// transaction.
    pub const fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    // =========================================================================
    // Appends
    // =========================================================================

    /// Append one event with the next version for `aggregate_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the transaction fails; nothing is
    /// written in that case.
    pub async fn append_event(
        &self,
        aggregate_id: AggregateId,
        event_type: &str,
        event_data: Vec<u8>,
        event_time: DateTime<Utc>,
    ) -> Result<Event, StoreError> {
        self.append_new(NewEvent::new(aggregate_id, event_type, event_data).with_time(event_time))
            .await
    }

    /// Append a typed payload, serialized as JSON and stamped with the
    /// current time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Contract`] if the payload cannot be serialized,
    /// or [`StoreError::Storage`] if the transaction fails.
    pub async fn append<P: EventPayload>(
        &self,
        aggregate_id: AggregateId,
        payload: &P,
    ) -> Result<Event, StoreError> {
        let event = NewEvent::from_payload(aggregate_id, payload)
            .map_err(|e| StoreError::contract("append_event", aggregate_id)(EntityError::from(e)))?;
        self.append_new(event).await
    }

    /// Append a prepared [`NewEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the transaction fails.
    pub async fn append_new(&self, event: NewEvent) -> Result<Event, StoreError> {
        let operation = "append_event";
        let aggregate_id = event.aggregate_id;

        let mut tx = self.begin_write(operation, aggregate_id).await?;
        let stored = self.events.store_event(&mut tx, &event).await?;
        tx.commit()
            .await
            .map_err(StoreError::storage(operation, aggregate_id))?;

        Ok(stored)
    }

    // =========================================================================
    // Event reads
    // =========================================================================

    /// All events of `aggregate_id`, ascending by version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the query fails.
    pub async fn load_events(&self, aggregate_id: AggregateId) -> Result<Vec<Event>, StoreError> {
        let mut conn = self.acquire("load_events", aggregate_id).await?;
        self.events.load_all_events(&mut conn, aggregate_id).await
    }

    /// Events of `aggregate_id` with `from_version <= version <= to_version`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the query fails.
    pub async fn load_events_range(
        &self,
        aggregate_id: AggregateId,
        from_version: i64,
        to_version: i64,
    ) -> Result<Vec<Event>, StoreError> {
        let mut conn = self.acquire("load_events_range", aggregate_id).await?;
        self.events
            .load_events_range(&mut conn, aggregate_id, from_version, to_version)
            .await
    }

    /// Events of `aggregate_id` with `version > since_version`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the query fails.
    pub async fn load_newest_events(
        &self,
        aggregate_id: AggregateId,
        since_version: i64,
    ) -> Result<Vec<Event>, StoreError> {
        let mut conn = self.acquire("load_newest_events", aggregate_id).await?;
        self.events
            .load_newest_events(&mut conn, aggregate_id, since_version)
            .await
    }

    // =========================================================================
    // Snapshot reads
    // =========================================================================

    /// The newest snapshot of `aggregate_id` / `aggregate_type`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if there is none.
    pub async fn load_latest_snapshot(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Snapshot, StoreError> {
        let mut conn = self.acquire("load_latest_snapshot", aggregate_id).await?;
        self.snapshots
            .load_latest_snapshot(&mut conn, aggregate_id, aggregate_type)
            .await
    }

    /// The snapshot of `aggregate_id` / `aggregate_type` at
    /// `snapshot_version`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if there is none.
    pub async fn load_snapshot(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        snapshot_version: i64,
    ) -> Result<Snapshot, StoreError> {
        let mut conn = self.acquire("load_snapshot", aggregate_id).await?;
        self.snapshots
            .load_snapshot(&mut conn, aggregate_id, aggregate_type, snapshot_version)
            .await
    }

    // =========================================================================
    // Entity operations
    // =========================================================================

    /// Rebuild `entity` from its latest snapshot and the events after it.
    ///
    /// An aggregate that was never snapshotted starts from the empty state
    /// and folds its whole history.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Contract`] if the entity rejects the snapshot
    /// or an event, and [`StoreError::Storage`] on database failure. The
    /// half-folded entity is dropped in both cases.
    pub async fn load_current_state<E: Entity>(&self, entity: E) -> Result<E, StoreError> {
        let operation = "load_current_state";
        let aggregate_id = entity.aggregate_id();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::storage(operation, aggregate_id))?;
        let replayed = self.replay_in(&mut tx, entity, operation).await?;
        tx.commit()
            .await
            .map_err(StoreError::storage(operation, aggregate_id))?;

        Ok(replayed.entity)
    }

    /// Store the entity's current state as a new snapshot.
    ///
    /// The snapshot records `entity.latest_event_version()`. The returned
    /// entity is re-initialized from the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Contract`] if the state cannot be serialized,
    /// and [`StoreError::Storage`] if the transaction fails.
    pub async fn store_snapshot<E: Entity>(&self, entity: E) -> Result<E, StoreError> {
        let operation = "store_snapshot";
        let aggregate_id = entity.aggregate_id();
        let latest_event_version = entity.latest_event_version();

        let mut tx = self.begin_write(operation, aggregate_id).await?;
        let snapshot = self
            .write_snapshot(&mut tx, &entity, latest_event_version, operation)
            .await?;
        tx.commit()
            .await
            .map_err(StoreError::storage(operation, aggregate_id))?;

        entity
            .init(Some(&snapshot))
            .map_err(StoreError::contract(operation, aggregate_id))
    }

    /// Replay the entity and snapshot the result, in one transaction.
    ///
    /// The new snapshot's `latest_event_version` is the version of the last
    /// event folded. When no event is newer than the latest snapshot
    /// (including an aggregate with no snapshot and no events) nothing is
    /// written and the replayed entity is returned as is.
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::load_current_state`] and
    /// [`EventStore::store_snapshot`].
    pub async fn make_snapshot<E: Entity>(&self, entity: E) -> Result<E, StoreError> {
        let operation = "make_snapshot";
        let aggregate_id = entity.aggregate_id();

        let mut tx = self.begin_write(operation, aggregate_id).await?;
        let Replayed {
            entity,
            last_folded,
        } = self.replay_in(&mut tx, entity, operation).await?;

        let Some(latest_event_version) = last_folded else {
            tracing::debug!(%aggregate_id, "No new events since last snapshot");
            return Ok(entity);
        };

        let snapshot = self
            .write_snapshot(&mut tx, &entity, latest_event_version, operation)
            .await?;
        tx.commit()
            .await
            .map_err(StoreError::storage(operation, aggregate_id))?;

        entity
            .init(Some(&snapshot))
            .map_err(StoreError::contract(operation, aggregate_id))
    }

    /// Hydrate `entity` from the snapshot at `snapshot_version` only.
    ///
    /// No events are folded: the result is the state as of that snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the snapshot does not exist and
    /// [`StoreError::Contract`] if the entity rejects it.
    pub async fn restore_snapshot<E: Entity>(
        &self,
        entity: E,
        snapshot_version: i64,
    ) -> Result<E, StoreError> {
        let aggregate_id = entity.aggregate_id();
        let snapshot = self
            .load_snapshot(aggregate_id, entity.aggregate_type(), snapshot_version)
            .await?;

        entity
            .init(Some(&snapshot))
            .map_err(StoreError::contract("restore_snapshot", aggregate_id))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Begin a transaction for a write path.
    ///
    /// Pinned to `READ COMMITTED` whatever the session default, so a guarded
    /// insert computes its version after the advisory lock is granted.
    async fn begin_write(
        &self,
        operation: &'static str,
        aggregate_id: AggregateId,
    ) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::storage(operation, aggregate_id))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::storage(operation, aggregate_id))?;
        Ok(tx)
    }

    async fn acquire(
        &self,
        operation: &'static str,
        aggregate_id: AggregateId,
    ) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, StoreError> {
        self.pool
            .acquire()
            .await
            .map_err(StoreError::storage(operation, aggregate_id))
    }

    /// Latest snapshot, `init`, then fold newer events in version order.
    async fn replay_in<E: Entity>(
        &self,
        conn: &mut PgConnection,
        entity: E,
        operation: &'static str,
    ) -> Result<Replayed<E>, StoreError> {
        let aggregate_id = entity.aggregate_id();

        let snapshot = match self
            .snapshots
            .load_latest_snapshot(&mut *conn, aggregate_id, entity.aggregate_type())
            .await
        {
            Ok(snapshot) => Some(snapshot),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        let entity = entity
            .init(snapshot.as_ref())
            .map_err(StoreError::contract(operation, aggregate_id))?;

        let events = self
            .events
            .load_newest_events(&mut *conn, aggregate_id, entity.latest_event_version())
            .await?;
        let last_folded = events.last().map(|e| e.event_version);

        let entity =
            replay(entity, &events).map_err(StoreError::contract(operation, aggregate_id))?;

        tracing::debug!(
            %aggregate_id,
            snapshot_version = snapshot.as_ref().map(|s| s.snapshot_version),
            folded = events.len(),
            latest_event_version = entity.latest_event_version(),
            "Replayed aggregate"
        );

        Ok(Replayed {
            entity,
            last_folded,
        })
    }

    async fn write_snapshot<E: Entity>(
        &self,
        conn: &mut PgConnection,
        entity: &E,
        latest_event_version: i64,
        operation: &'static str,
    ) -> Result<Snapshot, StoreError> {
        let aggregate_id = entity.aggregate_id();
        let data = entity
            .aggregate_state()
            .map_err(StoreError::contract(operation, aggregate_id))?;

        self.snapshots
            .store_snapshot(
                conn,
                SnapshotDraft {
                    aggregate_id,
                    aggregate_type: entity.aggregate_type(),
                    data: &data,
                    time: Utc::now(),
                    latest_event_version,
                },
            )
            .await
    }
}
