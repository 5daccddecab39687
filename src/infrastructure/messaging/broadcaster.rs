/// Organization-scoped real-time event fan-out
///
/// Events are fire-and-forget: sending with no subscribers, or to lagging
/// subscribers, never blocks or fails the caller.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Notification payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Notification {
    CallIncoming {
        call_log_id: Uuid,
        call_id: String,
        caller_phone: String,
        contact_id: Uuid,
        ivr_flow_id: Option<Uuid>,
        started_at: DateTime<Utc>,
    },
    CallAnswered {
        call_id: String,
        contact_id: Uuid,
        answered_at: DateTime<Utc>,
    },
    CallEnded {
        call_id: String,
        contact_id: Uuid,
        status: String,
        duration_secs: Option<i64>,
        ended_at: DateTime<Utc>,
    },
    /// A caller joined the agent queue
    AgentTransfer {
        transfer_id: Uuid,
        contact_id: Uuid,
        phone_number: String,
        team_id: Option<Uuid>,
        source: String,
    },
    AgentTransferResume {
        transfer_id: Uuid,
        contact_id: Uuid,
    },
    AgentTransferAssign {
        transfer_id: Uuid,
        contact_id: Uuid,
        agent_id: Option<Uuid>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::CallIncoming { .. } => "call_incoming",
            Notification::CallAnswered { .. } => "call_answered",
            Notification::CallEnded { .. } => "call_ended",
            Notification::AgentTransfer { .. } => "agent_transfer",
            Notification::AgentTransferResume { .. } => "agent_transfer_resume",
            Notification::AgentTransferAssign { .. } => "agent_transfer_assign",
        }
    }
}

/// A notification addressed to one organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgEvent {
    pub organization_id: Uuid,
    #[serde(flatten)]
    pub notification: Notification,
    pub timestamp: i64,
}

/// Event broadcaster
pub struct EventBroadcaster {
    tx: broadcast::Sender<OrgEvent>,
}

impl EventBroadcaster {
    /// Create new event broadcaster with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events of every organization
    pub fn subscribe(&self) -> broadcast::Receiver<OrgEvent> {
        self.tx.subscribe()
    }

    /// Publish a notification to an organization's subscribers
    pub fn publish(&self, organization_id: Uuid, notification: Notification) {
        let kind = notification.kind();
        let event = OrgEvent {
            organization_id,
            notification,
            timestamp: Utc::now().timestamp(),
        };
        if self.tx.send(event).is_err() {
            debug!("No subscribers for {} event", kind);
        }
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = EventBroadcaster::new(16);
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.publish(
            Uuid::new_v4(),
            Notification::AgentTransferResume {
                transfer_id: Uuid::new_v4(),
                contact_id: Uuid::new_v4(),
            },
        );
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let broadcaster = EventBroadcaster::new(16);
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();
        let org = Uuid::new_v4();

        broadcaster.publish(
            org,
            Notification::CallAnswered {
                call_id: "wacid.1".to_string(),
                contact_id: Uuid::new_v4(),
                answered_at: Utc::now(),
            },
        );

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1, e2);
        assert_eq!(e1.organization_id, org);
        assert_eq!(e1.notification.kind(), "call_answered");
    }

    #[test]
    fn test_event_serialization() {
        let event = OrgEvent {
            organization_id: Uuid::nil(),
            notification: Notification::CallEnded {
                call_id: "wacid.9".to_string(),
                contact_id: Uuid::nil(),
                status: "completed".to_string(),
                duration_secs: Some(42),
                ended_at: Utc::now(),
            },
            timestamp: 1234567890,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "call_ended");
        assert_eq!(json["payload"]["call_id"], "wacid.9");
        assert_eq!(json["payload"]["duration_secs"], 42);
        assert_eq!(json["timestamp"], 1234567890);
    }
}
