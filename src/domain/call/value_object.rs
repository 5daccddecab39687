//! Call value objects

use serde::{Deserialize, Serialize};

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Contact called the business number
    Incoming,
    /// Agent called the contact
    Outgoing,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Incoming => "incoming",
            CallDirection::Outgoing => "outgoing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "incoming" => Some(CallDirection::Incoming),
            "outgoing" => Some(CallDirection::Outgoing),
            _ => None,
        }
    }
}

/// Call status
///
/// `ringing -> answered -> completed`, with `missed`, `rejected` and
/// `failed` as terminal alternates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Answered,
    Completed,
    Missed,
    Rejected,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Completed => "completed",
            CallStatus::Missed => "missed",
            CallStatus::Rejected => "rejected",
            CallStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(CallStatus::Ringing),
            "answered" => Some(CallStatus::Answered),
            "completed" => Some(CallStatus::Completed),
            "missed" => Some(CallStatus::Missed),
            "rejected" => Some(CallStatus::Rejected),
            "failed" => Some(CallStatus::Failed),
            _ => None,
        }
    }

    /// Check if state transition is valid
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        use CallStatus::*;

        match (self, next) {
            (Ringing, Answered) => true,
            (Ringing, Missed) | (Ringing, Rejected) | (Ringing, Failed) => true,
            // An outgoing call that is cancelled before pickup still completes
            (Ringing, Completed) => true,

            (Answered, Completed) => true,
            (Answered, Missed) | (Answered, Failed) => true,

            // Terminal states never move again
            (Completed, _) | (Missed, _) | (Rejected, _) | (Failed, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Missed | CallStatus::Rejected | CallStatus::Failed
        )
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer sub-state of an answered call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    #[default]
    None,
    /// Caller is on hold in the agent queue
    Waiting,
    /// Caller and agent audio are bridged
    Connected,
    /// Caller left the queue and went back to the IVR
    Resumed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::None => "none",
            TransferStatus::Waiting => "waiting",
            TransferStatus::Connected => "connected",
            TransferStatus::Resumed => "resumed",
        }
    }

    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;

        matches!(
            (self, next),
            (None, Waiting)
                | (Waiting, Connected)
                | (Waiting, Resumed)
                | (Resumed, Waiting)
                // A finished bridge leaves the call free for another hand-off
                | (Connected, None)
        )
    }
}
