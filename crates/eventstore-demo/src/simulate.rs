//! Load simulation: many users, many random updates.
//!
//! Users are split across writer tasks. Each writer creates its users and
//! then appends `events_per_user` updates per user, each to a user picked at
//! random from its own share, so writers never contend for an aggregate.

use std::time::{Duration, Instant};

use chrono::Utc;
use eventstore_db::EventStore;
use eventstore_types::{AggregateId, NewEvent};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use crate::error::DemoError;
use crate::settings::SimulationSettings;
use crate::user::{UserCreated, UserEmailUpdated, UserNameUpdated, UserStatus, UserStatusUpdated};

const FIRST_NAMES: [&str; 8] = ["Ada", "Alan", "Barbara", "Edsger", "Grace", "Ken", "Linus", "Margaret"];
const LAST_NAMES: [&str; 8] = ["Hopper", "Knuth", "Lamport", "Liskov", "Lovelace", "Ritchie", "Thompson", "Turing"];

/// What a simulation run produced.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Every simulated user.
    pub users: Vec<AggregateId>,
    /// Events appended, creations included.
    pub events: u64,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// Create `settings.users` users and append random updates to them.
///
/// # Errors
///
/// Returns [`DemoError::Store`] on the first failed append, or
/// [`DemoError::Simulation`] if a writer task dies.
pub async fn run(store: &EventStore, settings: &SimulationSettings) -> Result<SimulationReport, DemoError> {
    let started = Instant::now();
    let users: Vec<AggregateId> = (0..settings.users).map(|_| AggregateId::new()).collect();
    let writers = usize::try_from(settings.writers).unwrap_or(1).max(1);
    let share = users.len().div_ceil(writers).max(1);

    let handles = users.chunks(share).zip(0_u64..).map(|(chunk, worker)| {
        let store = store.clone();
        let chunk = chunk.to_vec();
        let events_per_user = settings.events_per_user;
        let seed = settings.seed.wrapping_add(worker);
        tokio::spawn(async move { write_share(&store, &chunk, events_per_user, seed).await })
    });

    let mut events: u64 = 0;
    for joined in futures::future::join_all(handles).await {
        let written = joined.map_err(|e| DemoError::Simulation {
            message: format!("writer task failed: {e}"),
        })??;
        events = events.saturating_add(written);
    }

    Ok(SimulationReport {
        users,
        events,
        elapsed: started.elapsed(),
    })
}

/// Create every user in `share`, then append updates at random among them.
async fn write_share(
    store: &EventStore,
    share: &[AggregateId],
    events_per_user: u32,
    seed: u64,
) -> Result<u64, DemoError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut written: u64 = 0;

    for &id in share {
        store.append_new(random_creation(&mut rng, id)?).await?;
        written = written.saturating_add(1);
    }

    let updates = u64::try_from(share.len())
        .unwrap_or(u64::MAX)
        .saturating_mul(u64::from(events_per_user));
    for _ in 0..updates {
        let Some(&id) = share.choose(&mut rng) else {
            break;
        };
        store.append_new(random_update(&mut rng, id)?).await?;
        written = written.saturating_add(1);
    }

    tracing::debug!(users = share.len(), events = written, "Writer finished");
    Ok(written)
}

fn random_name(rng: &mut StdRng) -> String {
    let first = FIRST_NAMES.choose(rng).copied().unwrap_or("Ada");
    let last = LAST_NAMES.choose(rng).copied().unwrap_or("Lovelace");
    format!("{first} {last}")
}

fn random_email(rng: &mut StdRng) -> String {
    let first = FIRST_NAMES.choose(rng).copied().unwrap_or("ada");
    let n: u16 = rng.random_range(1..10_000);
    format!("{}{n}@example.com", first.to_lowercase())
}

fn random_creation(rng: &mut StdRng, id: AggregateId) -> Result<NewEvent, DemoError> {
    let created = UserCreated {
        name: random_name(rng),
        email: random_email(rng),
        status: UserStatus::Active,
        created_at: Utc::now(),
    };
    NewEvent::from_payload(id, &created).map_err(|e| DemoError::Simulation {
        message: format!("cannot encode event: {e}"),
    })
}

fn random_update(rng: &mut StdRng, id: AggregateId) -> Result<NewEvent, DemoError> {
    let updated_at = Utc::now();
    let encoded = match rng.random_range(0..3_u8) {
        0 => NewEvent::from_payload(
            id,
            &UserNameUpdated {
                name: random_name(rng),
                updated_at,
            },
        ),
        1 => NewEvent::from_payload(
            id,
            &UserEmailUpdated {
                email: random_email(rng),
                updated_at,
            },
        ),
        _ => NewEvent::from_payload(
            id,
            &UserStatusUpdated {
                status: UserStatus::ALL.choose(rng).copied().unwrap_or_default(),
                updated_at,
            },
        ),
    };
    encoded.map_err(|e| DemoError::Simulation {
        message: format!("cannot encode event: {e}"),
    })
}
