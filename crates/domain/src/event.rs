//! The event envelope — one append-only audit record, also the payload
//! carried on the tenant event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event type vocabulary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Typed event names. The domain vocabulary is closed; flow YAML may
/// introduce additional trigger names which round-trip through
/// [`EventType::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    StepDone,
    UserConfirm,
    UserModify,
    UserRollback,
    Abort,
    Reset,
    EventResult,
    EventError,
    EventAborted,
    EventPendingFanin,
    StateTransition,
    NeedUserInput,
    Ping,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::StepDone => "STEP_DONE",
            Self::UserConfirm => "USER_CONFIRM",
            Self::UserModify => "USER_MODIFY",
            Self::UserRollback => "USER_ROLLBACK",
            Self::Abort => "ABORT",
            Self::Reset => "RESET",
            Self::EventResult => "EVENT_RESULT",
            Self::EventError => "EVENT_ERROR",
            Self::EventAborted => "EVENT_ABORTED",
            Self::EventPendingFanin => "EVENT_PENDING_FANIN",
            Self::StateTransition => "STATE_TRANSITION",
            Self::NeedUserInput => "NEED_USER_INPUT",
            Self::Ping => "PING",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Parse never fails: unknown names become [`EventType::Custom`].
    pub fn parse(s: &str) -> Self {
        match s {
            "STEP_DONE" => Self::StepDone,
            "USER_CONFIRM" => Self::UserConfirm,
            "USER_MODIFY" => Self::UserModify,
            "USER_ROLLBACK" => Self::UserRollback,
            "ABORT" => Self::Abort,
            "RESET" => Self::Reset,
            "EVENT_RESULT" => Self::EventResult,
            "EVENT_ERROR" => Self::EventError,
            "EVENT_ABORTED" => Self::EventAborted,
            "EVENT_PENDING_FANIN" => Self::EventPendingFanin,
            "STATE_TRANSITION" => Self::StateTransition,
            "NEED_USER_INPUT" => Self::NeedUserInput,
            "PING" => Self::Ping,
            other => Self::Custom(other.to_owned()),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One audit record. Append-only; within a session `(tick, created_at)`
/// is non-decreasing in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub tenant_id: String,
    pub session_id: String,
    /// Node or component that produced the event.
    pub source: String,
    /// Addressed recipient; `None` means broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Per-session monotonic counter.
    pub tick: u64,
    pub trace_id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_state: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Build a new envelope with a fresh id and the current timestamp.
    /// The tick is assigned by the event repository on append.
    pub fn new(
        event_type: EventType,
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
        source: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            source: source.into(),
            target: None,
            tick: 0,
            trace_id: trace_id.into(),
            priority: 0,
            from_state: None,
            to_state: None,
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_states(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.from_state = Some(from.into());
        self.to_state = Some(to.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_domain_values() {
        for name in [
            "STEP_DONE",
            "USER_CONFIRM",
            "USER_MODIFY",
            "USER_ROLLBACK",
            "ABORT",
            "RESET",
            "EVENT_RESULT",
            "EVENT_ERROR",
            "EVENT_ABORTED",
            "EVENT_PENDING_FANIN",
            "STATE_TRANSITION",
            "NEED_USER_INPUT",
            "PING",
        ] {
            let parsed = EventType::parse(name);
            assert!(!matches!(parsed, EventType::Custom(_)), "{name} parsed as custom");
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn unknown_event_type_is_custom() {
        let t = EventType::parse("QUOTE_READY");
        assert_eq!(t, EventType::Custom("QUOTE_READY".into()));
        assert_eq!(t.as_str(), "QUOTE_READY");
    }

    #[test]
    fn event_type_serde_is_a_plain_string() {
        let json = serde_json::to_string(&EventType::StepDone).unwrap();
        assert_eq!(json, "\"STEP_DONE\"");
        let back: EventType = serde_json::from_str("\"STEP_DONE\"").unwrap();
        assert_eq!(back, EventType::StepDone);
    }

    #[test]
    fn envelope_serializes_with_type_field() {
        let ev = Event::new(EventType::StateTransition, "t1", "s1", "fsm", "tr1")
            .with_states("plan", "search");
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "STATE_TRANSITION");
        assert_eq!(v["from_state"], "plan");
        assert_eq!(v["to_state"], "search");
        assert_eq!(v["tick"], 0);
        // Broadcast events omit the target field entirely.
        assert!(v.get("target").is_none());
    }
}
