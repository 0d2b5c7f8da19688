//! The contract between the generic store and domain aggregates.
//!
//! The store never looks inside aggregate state or event payloads. It only
//! needs something that implements [`Entity`]: a value that can be hydrated
//! from a snapshot, folded forward one event at a time, and serialized back
//! into a snapshot.
//!
//! Folding is pure. [`Entity::init`] and [`Entity::on_event`] consume the
//! current value and return the next one, so a failed replay leaves nothing
//! half-applied behind for the caller to misuse.
//!
//! Most domain types do not implement [`Entity`] directly. They implement
//! [`Aggregate`] (a kind tag, a state codec, and a fold step) and are wrapped
//! in [`Tracked`], which keeps the bookkeeping the store relies on.
//!
//! ```text
//! UNINITIALIZED --init(snapshot)--> HYDRATING --on_event*--> REPLAYING --> CURRENT
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::Event;
use crate::ids::AggregateId;
use crate::snapshot::Snapshot;

/// Errors raised while hydrating or folding an entity.
///
/// Every variant means the entity and the stored data disagree; retrying
/// the same call will not help.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// A snapshot for a different aggregate was offered to `init`.
    #[error("snapshot belongs to aggregate {found}, expected {expected}")]
    ForeignSnapshot {
        /// The entity's aggregate.
        expected: AggregateId,
        /// The snapshot's aggregate.
        found: AggregateId,
    },

    /// A snapshot for a different aggregate kind was offered to `init`.
    #[error("snapshot has aggregate type {found:?}, expected {expected:?}")]
    WrongKind {
        /// The entity's kind tag.
        expected: String,
        /// The snapshot's kind tag.
        found: String,
    },

    /// An event for a different aggregate was offered to `on_event`.
    #[error("event {event_version} belongs to aggregate {found}, expected {expected}")]
    ForeignEvent {
        /// The entity's aggregate.
        expected: AggregateId,
        /// The event's aggregate.
        found: AggregateId,
        /// The event's version.
        event_version: i64,
    },

    /// An event did not advance the entity's version.
    #[error("event version {found} does not follow latest applied version {latest}")]
    OutOfOrder {
        /// Highest version already applied.
        latest: i64,
        /// Version of the offending event.
        found: i64,
    },

    /// State or payload bytes could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The aggregate refused to apply an event.
    #[error("cannot apply {event_type} event at version {event_version}: {reason}")]
    Rejected {
        /// Type tag of the refused event.
        event_type: String,
        /// Version of the refused event.
        event_version: i64,
        /// Why the aggregate refused it.
        reason: String,
    },
}

impl EntityError {
    /// Build a [`EntityError::Rejected`] for `event`.
    pub fn rejected(event: &Event, reason: impl Into<String>) -> Self {
        Self::Rejected {
            event_type: event.event_type.clone(),
            event_version: event.event_version,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EntityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(Box::new(err))
    }
}

/// Capabilities the store needs from anything it persists.
///
/// Implementations must be deterministic: folding the same events onto the
/// same snapshot always yields the same value, and `on_event` has no effects
/// outside the returned value.
pub trait Entity: Sized {
    /// Hydrate from `snapshot`, or reset to the empty state when `None`.
    ///
    /// The aggregate id is kept; everything else is replaced.
    fn init(self, snapshot: Option<&Snapshot>) -> Result<Self, EntityError>;

    /// Fold one event into the state.
    ///
    /// Must advance [`Entity::latest_event_version`] to the event's version.
    fn on_event(self, event: &Event) -> Result<Self, EntityError>;

    /// The aggregate this entity represents.
    fn aggregate_id(&self) -> AggregateId;

    /// Kind tag stored alongside snapshots.
    fn aggregate_type(&self) -> &str;

    /// Number of events reflected in the state.
    fn aggregate_version(&self) -> i64;

    /// Serialize the current state for a snapshot.
    fn aggregate_state(&self) -> Result<Vec<u8>, EntityError>;

    /// Version of the most recent event reflected in the state, 0 if none.
    fn latest_event_version(&self) -> i64;

    /// Time of the most recent event folded since the last `init`.
    fn latest_event_time(&self) -> Option<DateTime<Utc>>;
}

/// Fold `events` onto `entity` in the order given.
///
/// Each event must belong to the entity's aggregate and carry a version
/// strictly greater than the last one applied; anything else is rejected
/// before it reaches [`Entity::on_event`].
///
/// # Errors
///
/// Returns the first [`EntityError`] raised. The partially folded value is
/// dropped.
pub fn replay<'e, E, I>(entity: E, events: I) -> Result<E, EntityError>
where
    E: Entity,
    I: IntoIterator<Item = &'e Event>,
{
    events.into_iter().try_fold(entity, |entity, event| {
        if event.aggregate_id != entity.aggregate_id() {
            return Err(EntityError::ForeignEvent {
                expected: entity.aggregate_id(),
                found: event.aggregate_id,
                event_version: event.event_version,
            });
        }
        if event.event_version <= entity.latest_event_version() {
            return Err(EntityError::OutOfOrder {
                latest: entity.latest_event_version(),
                found: event.event_version,
            });
        }
        entity.on_event(event)
    })
}

/// Serialization contract for one aggregate state type.
pub trait StateCodec<S> {
    /// Encode `state` into snapshot bytes.
    fn encode(state: &S) -> Result<Vec<u8>, EntityError>;

    /// Decode snapshot bytes into a state value.
    fn decode(bytes: &[u8]) -> Result<S, EntityError>;
}

/// Default codec: JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<S: Serialize + DeserializeOwned> StateCodec<S> for JsonCodec {
    fn encode(state: &S) -> Result<Vec<u8>, EntityError> {
        Ok(serde_json::to_vec(state)?)
    }

    fn decode(bytes: &[u8]) -> Result<S, EntityError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A domain state that can be rebuilt from its events.
///
/// `Default` is the state before the first event.
pub trait Aggregate: Default + Sized {
    /// Kind tag, unique within an event stream.
    const AGGREGATE_TYPE: &'static str;

    /// How the state is stored in snapshots.
    type Codec: StateCodec<Self>;

    /// Fold one event into the state.
    fn apply(self, event: &Event) -> Result<Self, EntityError>;
}

/// Default [`Entity`] adapter around an [`Aggregate`] state.
///
/// Tracks the aggregate id, the snapshot the state was hydrated from, and
/// the version and time of the last event folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked<A> {
    aggregate_id: AggregateId,
    state: A,
    snapshot: Option<Snapshot>,
    aggregate_version: i64,
    latest_event_version: i64,
    latest_event_time: Option<DateTime<Utc>>,
}

impl<A: Aggregate> Tracked<A> {
    /// An uninitialized entity for `aggregate_id` holding the default state.
    pub fn new(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id,
            state: A::default(),
            snapshot: None,
            aggregate_version: 0,
            latest_event_version: 0,
            latest_event_time: None,
        }
    }

    /// Rebuild from the full event history, without a snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first [`EntityError`] raised while folding.
    pub fn from_events<'e, I>(aggregate_id: AggregateId, events: I) -> Result<Self, EntityError>
    where
        I: IntoIterator<Item = &'e Event>,
    {
        replay(Self::new(aggregate_id), events)
    }

    /// The current domain state.
    pub const fn state(&self) -> &A {
        &self.state
    }

    /// Consume the wrapper and return the domain state.
    pub fn into_state(self) -> A {
        self.state
    }

    /// The snapshot this entity was last hydrated from, if any.
    pub const fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }
}

impl<A: Aggregate> Entity for Tracked<A> {
    fn init(self, snapshot: Option<&Snapshot>) -> Result<Self, EntityError> {
        let Some(snapshot) = snapshot else {
            return Ok(Self::new(self.aggregate_id));
        };
        if snapshot.aggregate_id != self.aggregate_id {
            return Err(EntityError::ForeignSnapshot {
                expected: self.aggregate_id,
                found: snapshot.aggregate_id,
            });
        }
        if snapshot.aggregate_type != A::AGGREGATE_TYPE {
            return Err(EntityError::WrongKind {
                expected: A::AGGREGATE_TYPE.to_owned(),
                found: snapshot.aggregate_type.clone(),
            });
        }

        Ok(Self {
            aggregate_id: self.aggregate_id,
            state: A::Codec::decode(&snapshot.snapshot_data)?,
            snapshot: Some(snapshot.clone()),
            aggregate_version: snapshot.latest_event_version,
            latest_event_version: snapshot.latest_event_version,
            latest_event_time: None,
        })
    }

    fn on_event(self, event: &Event) -> Result<Self, EntityError> {
        let state = self.state.apply(event)?;
        Ok(Self {
            state,
            aggregate_version: self.aggregate_version.saturating_add(1),
            latest_event_version: event.event_version,
            latest_event_time: Some(event.event_time),
            ..self
        })
    }

    fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    fn aggregate_type(&self) -> &str {
        A::AGGREGATE_TYPE
    }

    fn aggregate_version(&self) -> i64 {
        self.aggregate_version
    }

    fn aggregate_state(&self) -> Result<Vec<u8>, EntityError> {
        A::Codec::encode(&self.state)
    }

    fn latest_event_version(&self) -> i64 {
        self.latest_event_version
    }

    fn latest_event_time(&self) -> Option<DateTime<Utc>> {
        self.latest_event_time
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::ids::{EventId, SnapshotId};

    #[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Counter {
        total: i64,
        applied: Vec<i64>,
    }

    impl Aggregate for Counter {
        const AGGREGATE_TYPE: &'static str = "counter";
        type Codec = JsonCodec;

        fn apply(mut self, event: &Event) -> Result<Self, EntityError> {
            match event.event_type.as_str() {
                "added" => {
                    let amount: i64 = event.decode()?;
                    self.total += amount;
                }
                "reset" => self.total = 0,
                other => return Err(EntityError::rejected(event, format!("unknown type {other}"))),
            }
            self.applied.push(event.event_version);
            Ok(self)
        }
    }

    fn added(id: AggregateId, version: i64, amount: i64) -> Event {
        Event {
            event_id: EventId::new(),
            aggregate_id: id,
            event_type: "added".to_owned(),
            event_version: version,
            event_data: serde_json::to_vec(&amount).unwrap(),
            event_time: Utc::now(),
        }
    }

    fn snapshot_of(entity: &Tracked<Counter>) -> Snapshot {
        Snapshot {
            snapshot_id: SnapshotId::new(),
            aggregate_id: entity.aggregate_id(),
            aggregate_type: entity.aggregate_type().to_owned(),
            snapshot_version: 1,
            snapshot_data: entity.aggregate_state().unwrap(),
            snapshot_time: Utc::now(),
            latest_event_version: entity.latest_event_version(),
        }
    }

    #[test]
    fn replay_folds_in_order_and_counts_versions() {
        let id = AggregateId::new();
        let events: Vec<Event> = (1..=5).map(|v| added(id, v, v * 10)).collect();

        let entity = Tracked::<Counter>::from_events(id, &events).unwrap();

        assert_eq!(entity.state().total, 150);
        assert_eq!(entity.state().applied, vec![1, 2, 3, 4, 5]);
        assert_eq!(entity.aggregate_version(), 5);
        assert_eq!(entity.latest_event_version(), 5);
        assert_eq!(entity.latest_event_time(), Some(events[4].event_time));
    }

    #[test]
    fn snapshot_then_tail_matches_full_replay() {
        let id = AggregateId::new();
        let events: Vec<Event> = (1..=8).map(|v| added(id, v, v)).collect();

        let full = Tracked::<Counter>::from_events(id, &events).unwrap();

        let head = Tracked::<Counter>::from_events(id, &events[..3]).unwrap();
        let snapshot = snapshot_of(&head);
        let hydrated = Tracked::<Counter>::new(id).init(Some(&snapshot)).unwrap();
        assert_eq!(hydrated.latest_event_version(), 3);
        assert_eq!(hydrated.latest_event_time(), None);

        let tail: Vec<&Event> = events
            .iter()
            .filter(|e| e.event_version > hydrated.latest_event_version())
            .collect();
        let resumed = replay(hydrated, tail).unwrap();

        assert_eq!(resumed.state(), full.state());
        assert_eq!(resumed.aggregate_version(), full.aggregate_version());
        assert_eq!(resumed.latest_event_version(), full.latest_event_version());
    }

    #[test]
    fn same_history_gives_equal_entities() {
        let id = AggregateId::new();
        let events: Vec<Event> = (1..=3).map(|v| added(id, v, v)).collect();

        let a = Tracked::<Counter>::from_events(id, &events).unwrap();
        let b = Tracked::<Counter>::from_events(id, &events).unwrap();
        assert_eq!(a, b);

        let shorter = Tracked::<Counter>::from_events(id, &events[..2]).unwrap();
        assert_ne!(a, shorter);
    }

    #[test]
    fn init_without_snapshot_resets_state() {
        let id = AggregateId::new();
        let entity = Tracked::<Counter>::from_events(id, &[added(id, 1, 7)]).unwrap();

        let reset = entity.init(None).unwrap();

        assert_eq!(reset, Tracked::new(id));
        assert!(reset.snapshot().is_none());
    }

    #[test]
    fn init_rejects_snapshot_of_other_aggregate_or_kind() {
        let id = AggregateId::new();
        let mut snapshot = snapshot_of(&Tracked::<Counter>::new(id));

        snapshot.aggregate_type = "invoice".to_owned();
        let err = Tracked::<Counter>::new(id).init(Some(&snapshot)).unwrap_err();
        assert!(matches!(err, EntityError::WrongKind { .. }));

        snapshot.aggregate_type = "counter".to_owned();
        let err = Tracked::<Counter>::new(AggregateId::new())
            .init(Some(&snapshot))
            .unwrap_err();
        assert!(matches!(err, EntityError::ForeignSnapshot { .. }));
    }

    #[test]
    fn init_rejects_undecodable_state() {
        let id = AggregateId::new();
        let mut snapshot = snapshot_of(&Tracked::<Counter>::new(id));
        snapshot.snapshot_data = b"not json".to_vec();

        let err = Tracked::<Counter>::new(id).init(Some(&snapshot)).unwrap_err();
        assert!(matches!(err, EntityError::Encoding(_)));
    }

    #[test]
    fn replay_rejects_duplicate_and_backward_versions() {
        let id = AggregateId::new();
        let events = vec![added(id, 1, 1), added(id, 2, 1), added(id, 2, 1)];

        let err = Tracked::<Counter>::from_events(id, &events).unwrap_err();

        assert!(matches!(err, EntityError::OutOfOrder { latest: 2, found: 2 }));
    }

    #[test]
    fn replay_rejects_foreign_events() {
        let id = AggregateId::new();
        let events = vec![added(AggregateId::new(), 1, 1)];

        let err = Tracked::<Counter>::from_events(id, &events).unwrap_err();

        assert!(matches!(err, EntityError::ForeignEvent { event_version: 1, .. }));
    }

    #[test]
    fn aggregate_rejection_surfaces_event_details() {
        let id = AggregateId::new();
        let mut event = added(id, 1, 1);
        event.event_type = "multiplied".to_owned();

        let err = Tracked::<Counter>::from_events(id, &[event]).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("multiplied"));
        assert!(msg.contains("version 1"));
    }
}
