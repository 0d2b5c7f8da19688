//! The `User` aggregate and its events.
//!
//! A user is created once and then renamed, re-addressed, or has its status
//! changed any number of times. Updates before creation and a second
//! creation are rejected during replay.

use chrono::{DateTime, Utc};
use eventstore_types::{Aggregate, EntityError, Event, EventPayload, JsonCodec, Tracked};
use serde::{Deserialize, Serialize};

/// A [`User`] wrapped for the event store.
pub type UserEntity = Tracked<User>;

/// Account status of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Can sign in.
    #[default]
    Active,
    /// Dormant, can be reactivated.
    Inactive,
    /// Blocked by an operator.
    Suspended,
}

impl UserStatus {
    /// Every status, for picking one at random.
    pub const ALL: [Self; 3] = [Self::Active, Self::Inactive, Self::Suspended];
}

/// The user was registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    /// Display name.
    pub name: String,
    /// Contact address.
    pub email: String,
    /// Initial status.
    pub status: UserStatus,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl EventPayload for UserCreated {
    const EVENT_TYPE: &'static str = "user_created";
}

/// The user changed their name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNameUpdated {
    /// New display name.
    pub name: String,
    /// When it changed.
    pub updated_at: DateTime<Utc>,
}

impl EventPayload for UserNameUpdated {
    const EVENT_TYPE: &'static str = "user_name_updated";
}

/// The user changed their email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEmailUpdated {
    /// New contact address.
    pub email: String,
    /// When it changed.
    pub updated_at: DateTime<Utc>,
}

impl EventPayload for UserEmailUpdated {
    const EVENT_TYPE: &'static str = "user_email_updated";
}

/// The user's status changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatusUpdated {
    /// New status.
    pub status: UserStatus,
    /// When it changed.
    pub updated_at: DateTime<Utc>,
}

impl EventPayload for UserStatusUpdated {
    const EVENT_TYPE: &'static str = "user_status_updated";
}

/// Current state of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Display name.
    pub name: String,
    /// Contact address.
    pub email: String,
    /// Account status.
    pub status: UserStatus,
    /// Registration time, `None` until [`UserCreated`] is applied.
    pub created_at: Option<DateTime<Utc>>,
    /// Time of the last update.
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether [`UserCreated`] has been applied.
    pub const fn exists(&self) -> bool {
        self.created_at.is_some()
    }

    fn require_exists(&self, event: &Event) -> Result<(), EntityError> {
        if self.exists() {
            Ok(())
        } else {
            Err(EntityError::rejected(event, "user does not exist"))
        }
    }
}

impl Aggregate for User {
    const AGGREGATE_TYPE: &'static str = "user";
    type Codec = JsonCodec;

    fn apply(mut self, event: &Event) -> Result<Self, EntityError> {
        match event.event_type.as_str() {
            UserCreated::EVENT_TYPE => {
                if self.exists() {
                    return Err(EntityError::rejected(event, "user already exists"));
                }
                let created: UserCreated = event.decode()?;
                self.name = created.name;
                self.email = created.email;
                self.status = created.status;
                self.created_at = Some(created.created_at);
            }
            UserNameUpdated::EVENT_TYPE => {
                self.require_exists(event)?;
                let update: UserNameUpdated = event.decode()?;
                self.name = update.name;
                self.updated_at = Some(update.updated_at);
            }
            UserEmailUpdated::EVENT_TYPE => {
                self.require_exists(event)?;
                let update: UserEmailUpdated = event.decode()?;
                self.email = update.email;
                self.updated_at = Some(update.updated_at);
            }
            UserStatusUpdated::EVENT_TYPE => {
                self.require_exists(event)?;
                let update: UserStatusUpdated = event.decode()?;
                self.status = update.status;
                self.updated_at = Some(update.updated_at);
            }
            other => {
                return Err(EntityError::rejected(
                    event,
                    format!("unknown user event type {other:?}"),
                ));
            }
        }
        Ok(self)
    }
}
