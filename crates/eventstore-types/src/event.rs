//! Event records and the input shape used to append them.
//!
//! The store only understands the envelope fields (id, aggregate, type tag,
//! version, time). `event_data` is carried through as opaque bytes;
//! conventionally it is a JSON document produced from an [`EventPayload`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::{AggregateId, EventId};

/// A typed event body that knows its own type tag.
///
/// The tag is what [`crate::Aggregate::apply`] matches on when folding, so it
/// must stay stable once events with it have been written.
pub trait EventPayload: Serialize {
    /// The string stored in the `event_type` column.
    const EVENT_TYPE: &'static str;
}

/// One immutable fact recorded against one aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique identifier, assigned at insert time.
    pub event_id: EventId,
    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// Type tag identifying the shape of `event_data`.
    pub event_type: String,
    /// Aggregate-scoped sequence number, starting at 1.
    pub event_version: i64,
    /// Opaque serialized payload.
    pub event_data: Vec<u8>,
    /// When the event was recorded.
    pub event_time: DateTime<Utc>,
}

impl Event {
    /// Deserialize `event_data` as JSON into `P`.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the payload does not match `P`.
    pub fn decode<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_slice(&self.event_data)
    }

    /// Whether this event carries the type tag of `P`.
    pub fn is<P: EventPayload>(&self) -> bool {
        self.event_type == P::EVENT_TYPE
    }
}

/// An event that has not been persisted yet.
///
/// The store assigns `event_id` and `event_version` when it writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// The aggregate the event is appended to.
    pub aggregate_id: AggregateId,
    /// Type tag identifying the shape of `event_data`.
    pub event_type: String,
    /// Opaque serialized payload.
    pub event_data: Vec<u8>,
    /// When the event happened.
    pub event_time: DateTime<Utc>,
}

impl NewEvent {
    /// Build an event from raw parts, stamped with the current time.
    pub fn new(aggregate_id: AggregateId, event_type: impl Into<String>, event_data: Vec<u8>) -> Self {
        Self {
            aggregate_id,
            event_type: event_type.into(),
            event_data,
            event_time: Utc::now(),
        }
    }

    /// Build an event from a typed payload, serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the payload cannot be serialized.
    pub fn from_payload<P: EventPayload>(
        aggregate_id: AggregateId,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        let event_data = serde_json::to_vec(payload)?;
        Ok(Self::new(aggregate_id, P::EVENT_TYPE, event_data))
    }

    /// Override the event time.
    #[must_use]
    pub const fn with_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = event_time;
        self
    }
}
