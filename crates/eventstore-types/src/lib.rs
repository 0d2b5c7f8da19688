//! Shared type definitions for the event store.
//!
//! This crate has no database dependency. It defines the records the store
//! persists and the contract domain aggregates implement so the store can
//! rebuild them without knowing their shape.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for aggregates, events, snapshots
//! - [`event`] -- Persisted events, unpersisted [`NewEvent`]s, typed payloads
//! - [`snapshot`] -- Persisted snapshots
//! - [`entity`] -- The [`Entity`] contract, the [`Aggregate`] fold, and replay

pub mod entity;
pub mod event;
pub mod ids;
pub mod snapshot;

// Re-export all public types at crate root for convenience.
pub use entity::{Aggregate, Entity, EntityError, JsonCodec, StateCodec, Tracked, replay};
pub use event::{Event, EventPayload, NewEvent};
pub use ids::{AggregateId, EventId, SnapshotId};
pub use snapshot::Snapshot;
