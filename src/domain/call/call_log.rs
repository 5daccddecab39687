//! Call log domain model
//!
//! One row per call. Created when the call first rings and updated on every
//! state transition; terminal rows only accept a late error annotation.

use super::value_object::{CallDirection, CallStatus};
use crate::domain::shared::{DomainError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Call log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallLog {
    pub id: Uuid,
    pub organization_id: Uuid,

    /// Provider-assigned call id
    pub call_id: String,
    /// Account name the call arrived on
    pub account_name: String,

    pub contact_id: Uuid,
    pub caller_phone: String,
    pub direction: CallDirection,
    pub status: CallStatus,

    /// Agent that placed (outgoing) or picked up (transferred) the call
    pub agent_id: Option<Uuid>,
    pub ivr_flow_id: Option<Uuid>,

    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Talk time in seconds, measured from `answered_at`
    pub duration_secs: Option<i64>,

    pub error_message: Option<String>,
    pub recording_url: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PENDING_CALL_ID_PREFIX: &str = "pending:";

impl CallLog {
    /// Create a ringing call log
    pub fn new(
        organization_id: Uuid,
        account_name: impl Into<String>,
        call_id: impl Into<String>,
        contact_id: Uuid,
        caller_phone: impl Into<String>,
        direction: CallDirection,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            call_id: call_id.into(),
            account_name: account_name.into(),
            contact_id,
            caller_phone: caller_phone.into(),
            direction,
            status: CallStatus::Ringing,
            agent_id: None,
            ivr_flow_id: None,
            started_at: now,
            answered_at: None,
            ended_at: None,
            duration_secs: None,
            error_message: None,
            recording_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create the log of an outgoing call before the provider has assigned
    /// a call id. The placeholder id is unique; replace it with
    /// [`CallLog::assign_call_id`] once the call is placed.
    pub fn pending_outgoing(
        organization_id: Uuid,
        account_name: impl Into<String>,
        contact_id: Uuid,
        phone_number: impl Into<String>,
    ) -> Self {
        let mut log = Self::new(
            organization_id,
            account_name,
            String::new(),
            contact_id,
            phone_number,
            CallDirection::Outgoing,
        );
        log.call_id = format!("{}{}", PENDING_CALL_ID_PREFIX, log.id);
        log
    }

    /// Whether the provider call id is still a placeholder
    pub fn has_pending_call_id(&self) -> bool {
        self.call_id.starts_with(PENDING_CALL_ID_PREFIX)
    }

    pub fn assign_call_id(&mut self, call_id: impl Into<String>) {
        self.call_id = call_id.into();
        self.updated_at = Utc::now();
    }

    fn transition_to(&mut self, next: CallStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition(format!(
                "call {}: {} -> {}",
                self.call_id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the call as answered
    pub fn mark_answered(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition_to(CallStatus::Answered)?;
        self.answered_at = Some(at);
        Ok(())
    }

    /// Mark the call as completed; duration is the talk time since answer
    pub fn mark_completed(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition_to(CallStatus::Completed)?;
        self.ended_at = Some(at);
        self.duration_secs = Some(
            self.answered_at
                .map(|answered| (at - answered).num_seconds().max(0))
                .unwrap_or(0),
        );
        Ok(())
    }

    pub fn mark_missed(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition_to(CallStatus::Missed)?;
        self.ended_at = Some(at);
        Ok(())
    }

    pub fn mark_rejected(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition_to(CallStatus::Rejected)?;
        self.ended_at = Some(at);
        Ok(())
    }

    /// Mark the call as failed.
    ///
    /// On a row that already reached a terminal state only the error
    /// message is recorded.
    pub fn mark_failed(&mut self, at: DateTime<Utc>, reason: impl Into<String>) {
        self.error_message = Some(reason.into());
        self.updated_at = Utc::now();
        if self.status.is_terminal() {
            return;
        }
        self.status = CallStatus::Failed;
        self.ended_at = Some(at);
        if let Some(answered) = self.answered_at {
            self.duration_secs = Some((at - answered).num_seconds().max(0));
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Call log repository
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CallLogRepository: Send + Sync {
    async fn create(&self, log: &CallLog) -> Result<()>;

    async fn update(&self, log: &CallLog) -> Result<()>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<CallLog>>;

    async fn get_by_call_id(&self, call_id: &str) -> Result<Option<CallLog>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ringing_log() -> CallLog {
        CallLog::new(
            Uuid::new_v4(),
            "main",
            "wacid.abc",
            Uuid::new_v4(),
            "+15550001111",
            CallDirection::Incoming,
        )
    }

    #[test]
    fn test_new_call_log_is_ringing() {
        let log = ringing_log();
        assert_eq!(log.status, CallStatus::Ringing);
        assert!(log.answered_at.is_none());
        assert!(!log.is_finished());
    }

    #[test]
    fn test_completed_duration_counts_from_answer() {
        let mut log = ringing_log();
        let answered = Utc::now();
        log.mark_answered(answered).unwrap();
        log.mark_completed(answered + Duration::seconds(42)).unwrap();

        assert_eq!(log.status, CallStatus::Completed);
        assert_eq!(log.duration_secs, Some(42));
    }

    #[test]
    fn test_completed_without_answer_has_zero_duration() {
        let mut log = ringing_log();
        log.mark_completed(Utc::now()).unwrap();
        assert_eq!(log.duration_secs, Some(0));
    }

    #[test]
    fn test_no_transition_after_terminal() {
        let mut log = ringing_log();
        log.mark_missed(Utc::now()).unwrap();
        assert!(matches!(
            log.mark_answered(Utc::now()),
            Err(DomainError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_late_failure_only_annotates() {
        let mut log = ringing_log();
        let answered = Utc::now();
        log.mark_answered(answered).unwrap();
        log.mark_completed(answered + Duration::seconds(5)).unwrap();

        log.mark_failed(Utc::now(), "provider error 131000");
        assert_eq!(log.status, CallStatus::Completed);
        assert_eq!(log.error_message.as_deref(), Some("provider error 131000"));
        assert_eq!(log.duration_secs, Some(5));
    }

    #[test]
    fn test_failure_from_ringing() {
        let mut log = ringing_log();
        log.mark_failed(Utc::now(), "ICE timeout");
        assert_eq!(log.status, CallStatus::Failed);
        assert!(log.ended_at.is_some());
    }

    #[test]
    fn test_pending_outgoing_gets_provider_id_later() {
        let org = Uuid::new_v4();
        let mut log = CallLog::pending_outgoing(org, "main", Uuid::new_v4(), "+15550001111");
        let other = CallLog::pending_outgoing(org, "main", Uuid::new_v4(), "+15550001111");
        assert_eq!(log.direction, CallDirection::Outgoing);
        assert_eq!(log.status, CallStatus::Ringing);
        assert!(log.has_pending_call_id());
        assert_ne!(log.call_id, other.call_id);

        log.assign_call_id("wacid.out");
        assert_eq!(log.call_id, "wacid.out");
        assert!(!log.has_pending_call_id());
    }
}
