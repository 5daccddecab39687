//! Call lifecycle events delivered by the provider webhook

use serde::{Deserialize, Serialize};

/// Lifecycle event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEventKind {
    /// Call is ringing (inbound offer, or callee alerted on outgoing calls)
    Ringing,
    /// Call was picked up; outgoing calls carry the callee's SDP answer
    InCall,
    Ended,
    Missed,
    Unanswered,
    /// Callee declined an outgoing call
    Rejected,
}

impl CallEventKind {
    /// Parse the provider's event name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ringing" | "connect" => Some(CallEventKind::Ringing),
            "in_call" | "accepted" => Some(CallEventKind::InCall),
            "ended" | "terminate" => Some(CallEventKind::Ended),
            "missed" => Some(CallEventKind::Missed),
            "unanswered" => Some(CallEventKind::Unanswered),
            "rejected" | "reject" => Some(CallEventKind::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallEventKind::Ringing => "ringing",
            CallEventKind::InCall => "in_call",
            CallEventKind::Ended => "ended",
            CallEventKind::Missed => "missed",
            CallEventKind::Unanswered => "unanswered",
            CallEventKind::Rejected => "rejected",
        }
    }
}

/// Error block attached to a call event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEventError {
    pub code: i64,
    pub message: String,
}

/// A call event as handed over by webhook ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEvent {
    pub kind: CallEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallEventError>,
}

impl CallEvent {
    pub fn new(kind: CallEventKind) -> Self {
        Self {
            kind,
            sdp: None,
            error: None,
        }
    }

    pub fn with_sdp(mut self, sdp: impl Into<String>) -> Self {
        let sdp = sdp.into();
        self.sdp = if sdp.is_empty() { None } else { Some(sdp) };
        self
    }

    pub fn with_error(mut self, code: i64, message: impl Into<String>) -> Self {
        self.error = Some(CallEventError {
            code,
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_event_names() {
        assert_eq!(CallEventKind::parse("ringing"), Some(CallEventKind::Ringing));
        assert_eq!(CallEventKind::parse("in_call"), Some(CallEventKind::InCall));
        assert_eq!(CallEventKind::parse("accepted"), Some(CallEventKind::InCall));
        assert_eq!(CallEventKind::parse("unanswered"), Some(CallEventKind::Unanswered));
        assert_eq!(CallEventKind::parse("dialing"), None);
    }

    #[test]
    fn test_empty_sdp_is_dropped() {
        let event = CallEvent::new(CallEventKind::InCall).with_sdp("");
        assert!(event.sdp.is_none());
    }

    #[test]
    fn test_event_json_shape() {
        let event = CallEvent::new(CallEventKind::Ended).with_error(131_000, "boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "ended");
        assert_eq!(json["error"]["code"], 131_000);
        assert!(json.get("sdp").is_none());
    }
}
