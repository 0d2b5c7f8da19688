//! Demo binary for the event store.
//!
//! Walks one `User` aggregate through its lifecycle, then simulates load
//! over many users and times snapshot-based loads.
//!
//! # Sequence
//!
//! 1. Load settings (`eventstore.toml`, `EVENTSTORE__*`, `DATABASE_URL`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and open the event stream
//! 4. Append a user's creation and three updates
//! 5. Replay the user and store a snapshot
//! 6. Simulate many users with random updates
//! 7. Time a full replay, a snapshot, and a snapshot-based load
//! 8. Close the pool

mod error;
mod settings;
mod simulate;
mod user;

use std::time::Instant;

use chrono::Utc;
use eventstore_db::{EventStore, PostgresPool};
use eventstore_types::{AggregateId, Entity};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::DemoError;
use crate::settings::{LoggingSettings, Settings};
use crate::user::{
    UserCreated, UserEmailUpdated, UserEntity, UserNameUpdated, UserStatus, UserStatusUpdated,
};

/// Demo entry point.
///
/// # Errors
///
/// Returns an error if settings are invalid, the database is unreachable,
/// or any store operation fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load settings.
    let settings = Settings::load()?;

    // 2. Initialize structured logging.
    init_tracing(&settings.logging);
    info!(
        stream = %settings.store.stream,
        version_guard = ?settings.store.version_guard,
        users = settings.simulation.users,
        events_per_user = settings.simulation.events_per_user,
        "eventstore-demo starting"
    );

    // 3. Connect and open the stream.
    let pool = PostgresPool::connect(&settings.database.pool_config()).await?;
    let store = EventStore::open_with(&pool, &settings.store.stream, settings.store.options()).await?;

    // 4-5. Single user walkthrough.
    let user_id = walkthrough(&store).await?;

    // 6. Simulated load.
    if settings.simulation.users > 0 {
        let report = simulate::run(&store, &settings.simulation).await?;
        info!(
            users = report.users.len(),
            events = report.events,
            elapsed_ms = report.elapsed.as_millis(),
            "Simulation finished"
        );

        // 7. Timed loads of a simulated user.
        if let Some(&sample) = report.users.last() {
            time_loads(&store, sample).await?;
        }
    }

    // The walkthrough user was snapshotted before the simulation.
    let started = Instant::now();
    let user = store.load_current_state(UserEntity::new(user_id)).await?;
    info!(
        %user_id,
        name = %user.state().name,
        elapsed_us = started.elapsed().as_micros(),
        "Loaded walkthrough user from snapshot"
    );

    // 8. Shut down.
    pool.close().await;
    info!("eventstore-demo finished");
    Ok(())
}

/// Initialize the tracing subscriber, JSON or human-readable.
fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create one user, update it three times, replay it, and snapshot it.
async fn walkthrough(store: &EventStore) -> Result<AggregateId, DemoError> {
    let user_id = AggregateId::new();

    store
        .append(
            user_id,
            &UserCreated {
                name: "John Doe".to_owned(),
                email: "johndoe@mail.dev".to_owned(),
                status: UserStatus::Active,
                created_at: Utc::now(),
            },
        )
        .await?;
    store
        .append(
            user_id,
            &UserNameUpdated {
                name: "John Doe Jr.".to_owned(),
                updated_at: Utc::now(),
            },
        )
        .await?;
    store
        .append(
            user_id,
            &UserEmailUpdated {
                email: "john@doe.dev".to_owned(),
                updated_at: Utc::now(),
            },
        )
        .await?;
    store
        .append(
            user_id,
            &UserStatusUpdated {
                status: UserStatus::Inactive,
                updated_at: Utc::now(),
            },
        )
        .await?;

    let user = store.load_current_state(UserEntity::new(user_id)).await?;
    info!(
        %user_id,
        name = %user.state().name,
        email = %user.state().email,
        status = ?user.state().status,
        aggregate_version = user.aggregate_version(),
        "Replayed user"
    );

    let user = store.store_snapshot(user).await?;
    if let Some(snapshot) = user.snapshot() {
        info!(
            %user_id,
            snapshot_version = snapshot.snapshot_version,
            latest_event_version = snapshot.latest_event_version,
            "Stored snapshot"
        );
    }

    Ok(user_id)
}

/// Replay `user_id` from scratch, snapshot it, and replay from the snapshot.
async fn time_loads(store: &EventStore, user_id: AggregateId) -> Result<(), DemoError> {
    let started = Instant::now();
    let full = store.load_current_state(UserEntity::new(user_id)).await?;
    let full_elapsed = started.elapsed();

    let started = Instant::now();
    store.make_snapshot(full.clone()).await?;
    let snapshot_elapsed = started.elapsed();

    let started = Instant::now();
    let from_snapshot = store.load_current_state(UserEntity::new(user_id)).await?;
    let snapshot_load_elapsed = started.elapsed();

    info!(
        %user_id,
        events = full.aggregate_version(),
        full_replay_us = full_elapsed.as_micros(),
        make_snapshot_us = snapshot_elapsed.as_micros(),
        snapshot_load_us = snapshot_load_elapsed.as_micros(),
        consistent = from_snapshot.state() == full.state(),
        "Timed loads"
    );
    Ok(())
}
