//! Table setup for an event stream.
//!
//! Each stream owns two tables:
//!
//! ```text
//! <stream>_events     event_id PK | aggregate_id | event_type | event_version | event_data | event_time
//!                     clustered on (aggregate_id, event_version ASC)
//! <stream>_snapshots  snapshot_id PK | aggregate_id | aggregate_type | snapshot_version
//!                     | snapshot_data | snapshot_time | latest_event_version
//!                     clustered on (aggregate_id, aggregate_type, snapshot_version DESC)
//! ```
//!
//! Every `CREATE` is `IF NOT EXISTS`, so preparing a stream that already
//! exists is a no-op. `CLUSTER` rewrites the table under an exclusive lock
//! and only runs when the table did not exist before.

use sqlx::{PgConnection, PgPool};

use crate::error::StoreError;
use crate::stream::StreamName;

/// DDL for the event log table and its clustering index.
pub fn event_table_statements(stream: &StreamName) -> [String; 2] {
    let table = stream.events_table();
    [
        format!(
            r"CREATE TABLE IF NOT EXISTS {table} (
                event_id UUID PRIMARY KEY,
                aggregate_id UUID NOT NULL,
                event_type VARCHAR(255) NOT NULL,
                event_version BIGINT NOT NULL,
                event_data BYTEA NOT NULL,
                event_time TIMESTAMPTZ NOT NULL
              )"
        ),
        format!(
            r"CREATE INDEX IF NOT EXISTS {table}_aggregate_id_idx ON {table}
                USING BTREE (aggregate_id, event_version ASC)"
        ),
    ]
}

/// DDL for the snapshot table and its clustering index.
pub fn snapshot_table_statements(stream: &StreamName) -> [String; 2] {
    let table = stream.snapshots_table();
    [
        format!(
            r"CREATE TABLE IF NOT EXISTS {table} (
                snapshot_id UUID PRIMARY KEY,
                aggregate_id UUID NOT NULL,
                aggregate_type VARCHAR(100) NOT NULL,
                snapshot_version BIGINT NOT NULL,
                snapshot_data BYTEA NOT NULL,
                snapshot_time TIMESTAMPTZ NOT NULL,
                latest_event_version BIGINT NOT NULL
              )"
        ),
        format!(
            r"CREATE INDEX IF NOT EXISTS {table}_aggregate_id_idx ON {table}
                USING BTREE (aggregate_id, aggregate_type, snapshot_version DESC)"
        ),
    ]
}

/// Order `table` physically by its aggregate index.
pub fn cluster_statement(table: &str) -> String {
    format!("CLUSTER {table} USING {table}_aggregate_id_idx")
}

/// Whether `table` exists in the current search path.
async fn table_exists(conn: &mut PgConnection, table: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(table)
        .fetch_one(conn)
        .await
}

/// Run `statements` for `table`, clustering it only if it is new.
///
/// Returns whether the table was created.
async fn create_table(
    conn: &mut PgConnection,
    table: &str,
    statements: [String; 2],
) -> Result<bool, sqlx::Error> {
    let existed = table_exists(&mut *conn, table).await?;
    for statement in statements {
        sqlx::query(&statement).execute(&mut *conn).await?;
    }
    if !existed {
        sqlx::query(&cluster_statement(table))
            .execute(&mut *conn)
            .await?;
    }
    Ok(!existed)
}

/// Create the event log table for `stream` if it does not exist.
///
/// Returns whether it was created.
///
/// # Errors
///
/// Returns the driver error of the first statement that fails.
pub async fn create_event_table(
    conn: &mut PgConnection,
    stream: &StreamName,
) -> Result<bool, sqlx::Error> {
    create_table(conn, &stream.events_table(), event_table_statements(stream)).await
}

/// Create the snapshot table for `stream` if it does not exist.
///
/// Returns whether it was created.
///
/// # Errors
///
/// Returns the driver error of the first statement that fails.
pub async fn create_snapshot_table(
    conn: &mut PgConnection,
    stream: &StreamName,
) -> Result<bool, sqlx::Error> {
    create_table(
        conn,
        &stream.snapshots_table(),
        snapshot_table_statements(stream),
    )
    .await
}

/// Create both tables for `stream` in a single transaction.
///
/// # Errors
///
/// Returns [`StoreError::Schema`] if any statement or the commit fails;
/// nothing is created in that case.
pub async fn prepare(pool: &PgPool, stream: &StreamName) -> Result<(), StoreError> {
    let schema_err = |source| StoreError::Schema {
        stream: stream.to_string(),
        source,
    };

    let mut tx = pool.begin().await.map_err(schema_err)?;
    let events_created = create_event_table(&mut tx, stream).await.map_err(schema_err)?;
    let snapshots_created = create_snapshot_table(&mut tx, stream).await.map_err(schema_err)?;
    tx.commit().await.map_err(schema_err)?;

    tracing::info!(%stream, events_created, snapshots_created, "Event stream tables ready");
    Ok(())
}
