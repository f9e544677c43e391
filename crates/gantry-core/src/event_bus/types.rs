use serde::{Deserialize, Serialize};

use crate::models::{ActualInstance, DesiredSpec};

/// Wire discriminator of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// `desired_spec_created`
    DesiredSpecCreated,
    /// `desired_spec_changed`
    DesiredSpecChanged,
    /// `desired_spec_removed`
    DesiredSpecRemoved,
    /// `actual_instance_created`
    ActualInstanceCreated,
    /// `actual_instance_changed`
    ActualInstanceChanged,
    /// `actual_instance_removed`
    ActualInstanceRemoved,
}

impl EventType {
    /// All event types, in declaration order.
    pub const ALL: [EventType; 6] = [
        Self::DesiredSpecCreated,
        Self::DesiredSpecChanged,
        Self::DesiredSpecRemoved,
        Self::ActualInstanceCreated,
        Self::ActualInstanceChanged,
        Self::ActualInstanceRemoved,
    ];

    /// Stable tag used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DesiredSpecCreated => "desired_spec_created",
            Self::DesiredSpecChanged => "desired_spec_changed",
            Self::DesiredSpecRemoved => "desired_spec_removed",
            Self::ActualInstanceCreated => "actual_instance_created",
            Self::ActualInstanceChanged => "actual_instance_changed",
            Self::ActualInstanceRemoved => "actual_instance_removed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = DecodeError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == tag)
            .ok_or_else(|| DecodeError::UnknownEventType(tag.to_string()))
    }
}

/// Failure to turn a tagged payload back into an [`Event`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The tag names no known event
    #[error("unrecognized event type: {0}")]
    UnknownEventType(String),
    /// The payload does not match the shape for its tag
    #[error("invalid {event_type} payload: {source}")]
    InvalidPayload {
        /// Tag the payload was decoded for
        event_type: EventType,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Paired snapshots of a record before and after an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition<T> {
    /// Snapshot prior to the update
    pub before: T,
    /// Snapshot after the update
    pub after: T,
}

/// State-change notification published through the hub.
///
/// Each variant owns its snapshots; an event never aliases store state.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A desired spec was created
    DesiredSpecCreated(DesiredSpec),
    /// A desired spec was updated
    DesiredSpecChanged(Transition<DesiredSpec>),
    /// A desired spec was removed
    DesiredSpecRemoved(DesiredSpec),
    /// An actual instance was created
    ActualInstanceCreated(ActualInstance),
    /// An actual instance was updated
    ActualInstanceChanged(Transition<ActualInstance>),
    /// An actual instance was removed
    ActualInstanceRemoved(ActualInstance),
}

impl Event {
    /// Wire discriminator of this event.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::DesiredSpecCreated(_) => EventType::DesiredSpecCreated,
            Self::DesiredSpecChanged(_) => EventType::DesiredSpecChanged,
            Self::DesiredSpecRemoved(_) => EventType::DesiredSpecRemoved,
            Self::ActualInstanceCreated(_) => EventType::ActualInstanceCreated,
            Self::ActualInstanceChanged(_) => EventType::ActualInstanceChanged,
            Self::ActualInstanceRemoved(_) => EventType::ActualInstanceRemoved,
        }
    }

    /// Process the event refers to.
    #[must_use]
    pub fn process_guid(&self) -> &str {
        match self {
            Self::DesiredSpecCreated(spec) | Self::DesiredSpecRemoved(spec) => &spec.process_guid,
            Self::DesiredSpecChanged(t) => &t.after.process_guid,
            Self::ActualInstanceCreated(instance) | Self::ActualInstanceRemoved(instance) => {
                &instance.process_guid
            }
            Self::ActualInstanceChanged(t) => &t.after.process_guid,
        }
    }

    /// Serialize the payload (without the tag) to JSON.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            Self::DesiredSpecCreated(spec) | Self::DesiredSpecRemoved(spec) => {
                serde_json::to_string(spec)
            }
            Self::DesiredSpecChanged(t) => serde_json::to_string(t),
            Self::ActualInstanceCreated(instance) | Self::ActualInstanceRemoved(instance) => {
                serde_json::to_string(instance)
            }
            Self::ActualInstanceChanged(t) => serde_json::to_string(t),
        }
    }

    /// Rebuild an event from its wire tag and JSON payload.
    pub fn decode(tag: &str, payload: &str) -> Result<Self, DecodeError> {
        let event_type: EventType = tag.parse()?;
        let invalid = |source| DecodeError::InvalidPayload { event_type, source };

        let event = match event_type {
            EventType::DesiredSpecCreated => {
                Self::DesiredSpecCreated(serde_json::from_str(payload).map_err(invalid)?)
            }
            EventType::DesiredSpecChanged => {
                Self::DesiredSpecChanged(serde_json::from_str(payload).map_err(invalid)?)
            }
            EventType::DesiredSpecRemoved => {
                Self::DesiredSpecRemoved(serde_json::from_str(payload).map_err(invalid)?)
            }
            EventType::ActualInstanceCreated => {
                Self::ActualInstanceCreated(serde_json::from_str(payload).map_err(invalid)?)
            }
            EventType::ActualInstanceChanged => {
                Self::ActualInstanceChanged(serde_json::from_str(payload).map_err(invalid)?)
            }
            EventType::ActualInstanceRemoved => {
                Self::ActualInstanceRemoved(serde_json::from_str(payload).map_err(invalid)?)
            }
        };
        Ok(event)
    }
}
