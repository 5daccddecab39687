//! Agent transfer queue domain model
//!
//! A transfer is a persisted queue entry handing a contact (and, for voice,
//! the live call) to a human agent. Entries are picked strictly oldest
//! first; an organization never has two `active` transfers for one contact.

use crate::domain::shared::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Queue entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentTransferStatus {
    Active,
    Resumed,
    Completed,
    Abandoned,
}

impl AgentTransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentTransferStatus::Active => "active",
            AgentTransferStatus::Resumed => "resumed",
            AgentTransferStatus::Completed => "completed",
            AgentTransferStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AgentTransferStatus::Active),
            "resumed" => Some(AgentTransferStatus::Resumed),
            "completed" => Some(AgentTransferStatus::Completed),
            "abandoned" => Some(AgentTransferStatus::Abandoned),
            _ => None,
        }
    }
}

/// What asked for the hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferSource {
    Manual,
    Flow,
    Keyword,
    Ivr,
}

impl TransferSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferSource::Manual => "manual",
            TransferSource::Flow => "flow",
            TransferSource::Keyword => "keyword",
            TransferSource::Ivr => "ivr",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(TransferSource::Manual),
            "flow" => Some(TransferSource::Flow),
            "keyword" => Some(TransferSource::Keyword),
            "ivr" => Some(TransferSource::Ivr),
            _ => None,
        }
    }
}

/// Agent transfer queue entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTransfer {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub account_name: String,
    pub phone_number: String,
    pub status: AgentTransferStatus,
    pub source: TransferSource,

    /// `None` puts the entry in the general queue
    pub team_id: Option<Uuid>,
    /// `None` means unassigned
    pub agent_id: Option<Uuid>,
    /// Set for voice hand-offs
    pub call_log_id: Option<Uuid>,

    pub notes: Option<String>,
    pub transferred_by: Option<Uuid>,
    pub transferred_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub resumed_by: Option<Uuid>,

    /// Agent audio bridged with the caller
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub talk_duration_secs: Option<i64>,

    /// Insertion order, breaks ties on `transferred_at`
    pub seq: i64,
}

/// Input for creating a queue entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewAgentTransfer {
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub account_name: String,
    pub phone_number: String,
    pub source: TransferSource,
    pub team_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub call_log_id: Option<Uuid>,
    pub notes: Option<String>,
    pub transferred_by: Option<Uuid>,
}

impl AgentTransfer {
    /// Materialize a new active entry
    pub fn from_new(new: NewAgentTransfer, transferred_at: DateTime<Utc>, seq: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: new.organization_id,
            contact_id: new.contact_id,
            account_name: new.account_name,
            phone_number: new.phone_number,
            status: AgentTransferStatus::Active,
            source: new.source,
            team_id: new.team_id,
            agent_id: new.agent_id,
            call_log_id: new.call_log_id,
            notes: new.notes,
            transferred_by: new.transferred_by,
            transferred_at,
            resumed_at: None,
            resumed_by: None,
            connected_at: None,
            ended_at: None,
            talk_duration_secs: None,
            seq,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentTransferStatus::Active
    }

    pub fn is_unassigned(&self) -> bool {
        self.agent_id.is_none()
    }

    /// Send the contact back to automation
    pub fn resume(&mut self, by: Option<Uuid>, at: DateTime<Utc>) -> Result<(), TransferError> {
        if !self.is_active() {
            return Err(TransferError::NotActive(self.id));
        }
        self.status = AgentTransferStatus::Resumed;
        self.resumed_at = Some(at);
        self.resumed_by = by;
        Ok(())
    }

    pub fn mark_connected(&mut self, at: DateTime<Utc>) -> Result<(), TransferError> {
        if !self.is_active() {
            return Err(TransferError::NotActive(self.id));
        }
        self.connected_at = Some(at);
        Ok(())
    }

    /// Close the entry after the agent conversation; talk time runs from
    /// the bridge start
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = AgentTransferStatus::Completed;
        self.ended_at = Some(at);
        self.talk_duration_secs = self
            .connected_at
            .map(|start| (at - start).num_seconds().max(0));
    }

    /// Caller hung up while still waiting
    pub fn abandon(&mut self, at: DateTime<Utc>) {
        self.status = AgentTransferStatus::Abandoned;
        self.ended_at = Some(at);
    }
}

/// Which queues an agent may pick from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickScope {
    /// Only the general queue
    General,
    /// Only one team's queue
    Team(Uuid),
    /// General queue plus the given team queues
    GeneralAndTeams(Vec<Uuid>),
}

impl PickScope {
    pub fn includes(&self, transfer: &AgentTransfer) -> bool {
        match (self, transfer.team_id) {
            (PickScope::General, None) => true,
            (PickScope::General, Some(_)) => false,
            (PickScope::Team(team), Some(id)) => *team == id,
            (PickScope::Team(_), None) => false,
            (PickScope::GeneralAndTeams(_), None) => true,
            (PickScope::GeneralAndTeams(teams), Some(id)) => teams.contains(&id),
        }
    }
}

/// Organization-level queue settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Agents may pull the next transfer themselves
    pub allow_agent_queue_pickup: bool,
    /// Agents also see the queues of teams they belong to
    pub team_queue_pickup: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            allow_agent_queue_pickup: true,
            team_queue_pickup: true,
        }
    }
}

/// Queue outcomes that are not plain persistence failures
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("contact {contact_id} already has an active transfer")]
    ActiveTransferExists { contact_id: Uuid },

    #[error("agent {agent_id} is not available")]
    AgentUnavailable { agent_id: Uuid },

    #[error("agent queue pickup is disabled for this organization")]
    PickupDisabled,

    #[error("transfer not found: {0}")]
    NotFound(Uuid),

    #[error("transfer {0} is not active")]
    NotActive(Uuid),

    #[error("transfer {transfer_id} is not assigned to agent {agent_id}")]
    NotAssigned { transfer_id: Uuid, agent_id: Uuid },

    #[error("no live call is waiting for transfer {0}")]
    CallNotWaiting(Uuid),

    #[error(transparent)]
    Repository(#[from] DomainError),
}

/// Agent transfer repository
///
/// `create_active` and `pick_next` must be atomic with respect to
/// concurrent callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AgentTransferRepository: Send + Sync {
    /// Insert an active entry unless the contact already has one
    async fn create_active(&self, new: NewAgentTransfer) -> Result<AgentTransfer, TransferError>;

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<AgentTransfer>, DomainError>;

    async fn update(&self, transfer: &AgentTransfer) -> Result<(), DomainError>;

    /// Assign the oldest unassigned active entry within `scope` to `agent_id`
    async fn pick_next(
        &self,
        organization_id: Uuid,
        agent_id: Uuid,
        scope: PickScope,
    ) -> Result<Option<AgentTransfer>, DomainError>;

    /// Unassign every active entry held by the agent; returns how many
    async fn return_to_queue(&self, organization_id: Uuid, agent_id: Uuid) -> Result<u64, DomainError>;

    async fn active_for_contact(
        &self,
        organization_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<AgentTransfer>, DomainError>;

    /// Active entries in queue order
    async fn list_active(&self, organization_id: Uuid) -> Result<Vec<AgentTransfer>, DomainError>;
}

/// Agent presence and team membership, owned by the user directory
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn is_available(&self, organization_id: Uuid, agent_id: Uuid) -> Result<bool, DomainError>;

    async fn team_ids(&self, organization_id: Uuid, agent_id: Uuid) -> Result<Vec<Uuid>, DomainError>;

    async fn queue_settings(&self, organization_id: Uuid) -> Result<QueueSettings, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_transfer(team_id: Option<Uuid>) -> AgentTransfer {
        AgentTransfer::from_new(
            NewAgentTransfer {
                organization_id: Uuid::new_v4(),
                contact_id: Uuid::new_v4(),
                account_name: "main".to_string(),
                phone_number: "15550001111".to_string(),
                source: TransferSource::Ivr,
                team_id,
                agent_id: None,
                call_log_id: None,
                notes: None,
                transferred_by: None,
            },
            Utc::now(),
            1,
        )
    }

    #[test]
    fn test_new_transfer_is_active_and_unassigned() {
        let transfer = new_transfer(None);
        assert!(transfer.is_active());
        assert!(transfer.is_unassigned());
    }

    #[test]
    fn test_resume_only_from_active() {
        let mut transfer = new_transfer(None);
        let by = Uuid::new_v4();
        transfer.resume(Some(by), Utc::now()).unwrap();
        assert_eq!(transfer.status, AgentTransferStatus::Resumed);
        assert_eq!(transfer.resumed_by, Some(by));

        assert!(matches!(
            transfer.resume(None, Utc::now()),
            Err(TransferError::NotActive(_))
        ));
    }

    #[test]
    fn test_complete_records_talk_time() {
        let mut transfer = new_transfer(None);
        let start = Utc::now();
        transfer.mark_connected(start).unwrap();
        transfer.complete(start + Duration::seconds(90));

        assert_eq!(transfer.status, AgentTransferStatus::Completed);
        assert_eq!(transfer.talk_duration_secs, Some(90));
    }

    #[test]
    fn test_abandon_has_no_talk_time() {
        let mut transfer = new_transfer(None);
        transfer.abandon(Utc::now());
        assert_eq!(transfer.status, AgentTransferStatus::Abandoned);
        assert!(transfer.talk_duration_secs.is_none());
    }

    #[test]
    fn test_pick_scope_visibility() {
        let team = Uuid::new_v4();
        let other_team = Uuid::new_v4();
        let general = new_transfer(None);
        let team_entry = new_transfer(Some(team));
        let other_entry = new_transfer(Some(other_team));

        assert!(PickScope::General.includes(&general));
        assert!(!PickScope::General.includes(&team_entry));

        assert!(PickScope::Team(team).includes(&team_entry));
        assert!(!PickScope::Team(team).includes(&general));
        assert!(!PickScope::Team(team).includes(&other_entry));

        let visible = PickScope::GeneralAndTeams(vec![team]);
        assert!(visible.includes(&general));
        assert!(visible.includes(&team_entry));
        assert!(!visible.includes(&other_entry));
    }
}
