//! Event types for rentald -> observer streaming

use chrono::{DateTime, Local};
use rental_util::{ResourceId, SessionId};
use serde::{Deserialize, Serialize};

use crate::{ActiveSnapshot, SessionInfo, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: rental_util::now(),
            payload,
        }
    }

    /// Envelope with an explicit timestamp (the transition time)
    pub fn at(timestamp: DateTime<Local>, payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp,
            payload,
        }
    }
}

/// Kind of session transition carried by a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    Started,
    Paused,
    Resumed,
    Completed,
    Expired,
}

/// Delta broadcast on every applied transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub kind: TransitionKind,
    pub session_id: SessionId,
    pub resource_id: ResourceId,
    /// Session state right after the transition
    pub session: SessionInfo,
}

/// All possible events from the service to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full set of live sessions
    Snapshot(ActiveSnapshot),

    /// A session changed state
    Transition(TransitionEvent),

    /// A fixed-duration session is close to its limit
    ExpiryWarning {
        session_id: SessionId,
        resource_id: ResourceId,
        customer_name: String,
        remaining_minutes: u64,
    },

    /// The observer missed deltas and must fetch a fresh snapshot
    ResyncRequired { missed: u64 },

    /// Service is shutting down
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&TransitionKind::Started).unwrap(),
            "\"STARTED\""
        );
        assert_eq!(
            serde_json::to_string(&TransitionKind::Expired).unwrap(),
            "\"EXPIRED\""
        );
    }

    #[test]
    fn event_serialization() {
        let event = Event::new(EventPayload::ExpiryWarning {
            session_id: SessionId::new(),
            resource_id: ResourceId::new("ps5-1"),
            customer_name: "Jane".into(),
            remaining_minutes: 5,
        });

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.api_version, API_VERSION);
        assert!(matches!(
            parsed.payload,
            EventPayload::ExpiryWarning { remaining_minutes: 5, .. }
        ));
    }

    #[test]
    fn resync_required_round_trips() {
        let json = serde_json::to_string(&Event::new(EventPayload::ResyncRequired { missed: 12 }))
            .unwrap();
        assert!(json.contains(r#""type":"resync_required""#));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed.payload, EventPayload::ResyncRequired { missed: 12 }));
    }
}
