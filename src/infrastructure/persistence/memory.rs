//! In-memory repositories
//!
//! Used by tests and by the `memory` build. Every operation takes the
//! store's write lock for its whole duration, which gives the same
//! atomicity the Postgres implementations get from row locks.

use crate::domain::account::{AccountRepository, Contact, WhatsAppAccount};
use crate::domain::agent_transfer::{
    AgentDirectory, AgentTransfer, AgentTransferRepository, NewAgentTransfer, PickScope, QueueSettings,
    TransferError,
};
use crate::domain::call::{CallLog, CallLogRepository};
use crate::domain::call_permission::{CallPermission, CallPermissionRepository};
use crate::domain::ivr_flow::{IvrFlow, IvrFlowRepository};
use crate::domain::shared::{DomainError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory call logs
#[derive(Default)]
pub struct MemoryCallLogRepository {
    logs: Arc<RwLock<HashMap<Uuid, CallLog>>>,
}

impl MemoryCallLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<CallLog> {
        self.logs.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl CallLogRepository for MemoryCallLogRepository {
    async fn create(&self, log: &CallLog) -> Result<()> {
        let mut logs = self.logs.write().await;
        if logs.values().any(|l| l.call_id == log.call_id) {
            return Err(DomainError::AlreadyExists(format!("call log for {}", log.call_id)));
        }
        logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn update(&self, log: &CallLog) -> Result<()> {
        let mut logs = self.logs.write().await;
        match logs.get_mut(&log.id) {
            Some(existing) => {
                *existing = log.clone();
                Ok(())
            }
            None => Err(DomainError::NotFound(format!("call log {}", log.id))),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<CallLog>> {
        Ok(self.logs.read().await.get(&id).cloned())
    }

    async fn get_by_call_id(&self, call_id: &str) -> Result<Option<CallLog>> {
        Ok(self
            .logs
            .read()
            .await
            .values()
            .find(|l| l.call_id == call_id)
            .cloned())
    }
}

#[derive(Default)]
struct TransferStore {
    transfers: HashMap<Uuid, AgentTransfer>,
    next_seq: i64,
}

/// In-memory agent transfer queue
#[derive(Default)]
pub struct MemoryAgentTransferRepository {
    store: Arc<RwLock<TransferStore>>,
}

impl MemoryAgentTransferRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn queue_order(a: &AgentTransfer, b: &AgentTransfer) -> std::cmp::Ordering {
    a.transferred_at.cmp(&b.transferred_at).then(a.seq.cmp(&b.seq))
}

#[async_trait]
impl AgentTransferRepository for MemoryAgentTransferRepository {
    async fn create_active(&self, new: NewAgentTransfer) -> std::result::Result<AgentTransfer, TransferError> {
        let mut store = self.store.write().await;
        let duplicate = store.transfers.values().any(|t| {
            t.is_active() && t.organization_id == new.organization_id && t.contact_id == new.contact_id
        });
        if duplicate {
            return Err(TransferError::ActiveTransferExists {
                contact_id: new.contact_id,
            });
        }

        store.next_seq += 1;
        let transfer = AgentTransfer::from_new(new, Utc::now(), store.next_seq);
        store.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<AgentTransfer>> {
        Ok(self
            .store
            .read()
            .await
            .transfers
            .get(&id)
            .filter(|t| t.organization_id == organization_id)
            .cloned())
    }

    async fn update(&self, transfer: &AgentTransfer) -> Result<()> {
        let mut store = self.store.write().await;
        match store.transfers.get_mut(&transfer.id) {
            Some(existing) => {
                *existing = transfer.clone();
                Ok(())
            }
            None => Err(DomainError::NotFound(format!("agent transfer {}", transfer.id))),
        }
    }

    async fn pick_next(
        &self,
        organization_id: Uuid,
        agent_id: Uuid,
        scope: PickScope,
    ) -> Result<Option<AgentTransfer>> {
        let mut store = self.store.write().await;
        let next_id = store
            .transfers
            .values()
            .filter(|t| {
                t.organization_id == organization_id && t.is_active() && t.is_unassigned() && scope.includes(t)
            })
            .min_by(|a, b| queue_order(a, b))
            .map(|t| t.id);

        Ok(next_id.and_then(|id| {
            store.transfers.get_mut(&id).map(|t| {
                t.agent_id = Some(agent_id);
                t.clone()
            })
        }))
    }

    async fn return_to_queue(&self, organization_id: Uuid, agent_id: Uuid) -> Result<u64> {
        let mut store = self.store.write().await;
        let mut count = 0;
        for transfer in store.transfers.values_mut() {
            if transfer.organization_id == organization_id
                && transfer.is_active()
                && transfer.agent_id == Some(agent_id)
            {
                transfer.agent_id = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn active_for_contact(&self, organization_id: Uuid, contact_id: Uuid) -> Result<Option<AgentTransfer>> {
        Ok(self
            .store
            .read()
            .await
            .transfers
            .values()
            .find(|t| t.organization_id == organization_id && t.contact_id == contact_id && t.is_active())
            .cloned())
    }

    async fn list_active(&self, organization_id: Uuid) -> Result<Vec<AgentTransfer>> {
        let store = self.store.read().await;
        let mut active: Vec<AgentTransfer> = store
            .transfers
            .values()
            .filter(|t| t.organization_id == organization_id && t.is_active())
            .cloned()
            .collect();
        active.sort_by(queue_order);
        Ok(active)
    }
}

/// In-memory call permissions
#[derive(Default)]
pub struct MemoryCallPermissionRepository {
    permissions: Arc<RwLock<Vec<CallPermission>>>,
}

impl MemoryCallPermissionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallPermissionRepository for MemoryCallPermissionRepository {
    async fn create(&self, permission: &CallPermission) -> Result<()> {
        self.permissions.write().await.push(permission.clone());
        Ok(())
    }

    async fn update(&self, permission: &CallPermission) -> Result<()> {
        let mut permissions = self.permissions.write().await;
        match permissions.iter_mut().find(|p| p.id == permission.id) {
            Some(existing) => {
                *existing = permission.clone();
                Ok(())
            }
            None => Err(DomainError::NotFound(format!("call permission {}", permission.id))),
        }
    }

    async fn latest_for_contact(&self, organization_id: Uuid, contact_id: Uuid) -> Result<Option<CallPermission>> {
        Ok(self
            .permissions
            .read()
            .await
            .iter()
            .filter(|p| p.organization_id == organization_id && p.contact_id == contact_id)
            .max_by_key(|p| p.requested_at)
            .cloned())
    }
}

/// In-memory IVR flows
#[derive(Default)]
pub struct MemoryIvrFlowRepository {
    flows: Arc<RwLock<HashMap<Uuid, IvrFlow>>>,
}

impl MemoryIvrFlowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, flow: IvrFlow) {
        self.flows.write().await.insert(flow.id, flow);
    }
}

#[async_trait]
impl IvrFlowRepository for MemoryIvrFlowRepository {
    async fn get(&self, id: Uuid) -> Result<Option<IvrFlow>> {
        Ok(self.flows.read().await.get(&id).cloned())
    }

    async fn active_for_account(&self, organization_id: Uuid, account_name: &str) -> Result<Option<IvrFlow>> {
        Ok(self
            .flows
            .read()
            .await
            .values()
            .filter(|f| f.organization_id == organization_id && f.account_name == account_name && f.is_active)
            .max_by_key(|f| f.updated_at)
            .cloned())
    }
}

/// In-memory accounts and contacts
#[derive(Default)]
pub struct MemoryAccountRepository {
    accounts: Arc<RwLock<Vec<WhatsAppAccount>>>,
    contacts: Arc<RwLock<HashMap<Uuid, Contact>>>,
}

impl MemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_account(&self, account: WhatsAppAccount) {
        self.accounts.write().await.push(account);
    }

    pub async fn insert_contact(&self, contact: Contact) {
        self.contacts.write().await.insert(contact.id, contact);
    }
}

#[async_trait]
impl AccountRepository for MemoryAccountRepository {
    async fn get_account(&self, organization_id: Uuid, name: &str) -> Result<Option<WhatsAppAccount>> {
        Ok(self
            .accounts
            .read()
            .await
            .iter()
            .find(|a| a.organization_id == organization_id && a.name == name)
            .cloned())
    }

    async fn get_contact(&self, organization_id: Uuid, contact_id: Uuid) -> Result<Option<Contact>> {
        Ok(self
            .contacts
            .read()
            .await
            .get(&contact_id)
            .filter(|c| c.organization_id == organization_id)
            .cloned())
    }
}

/// In-memory agent presence and teams
#[derive(Default)]
pub struct MemoryAgentDirectory {
    available: Arc<RwLock<HashSet<Uuid>>>,
    teams: Arc<RwLock<HashMap<Uuid, Vec<Uuid>>>>,
    settings: Arc<RwLock<HashMap<Uuid, QueueSettings>>>,
}

impl MemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_available(&self, agent_id: Uuid, available: bool) {
        let mut set = self.available.write().await;
        if available {
            set.insert(agent_id);
        } else {
            set.remove(&agent_id);
        }
    }

    pub async fn set_teams(&self, agent_id: Uuid, teams: Vec<Uuid>) {
        self.teams.write().await.insert(agent_id, teams);
    }

    pub async fn set_queue_settings(&self, organization_id: Uuid, settings: QueueSettings) {
        self.settings.write().await.insert(organization_id, settings);
    }
}

#[async_trait]
impl AgentDirectory for MemoryAgentDirectory {
    async fn is_available(&self, _organization_id: Uuid, agent_id: Uuid) -> Result<bool> {
        Ok(self.available.read().await.contains(&agent_id))
    }

    async fn team_ids(&self, _organization_id: Uuid, agent_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.teams.read().await.get(&agent_id).cloned().unwrap_or_default())
    }

    async fn queue_settings(&self, organization_id: Uuid) -> Result<QueueSettings> {
        Ok(self
            .settings
            .read()
            .await
            .get(&organization_id)
            .copied()
            .unwrap_or_default())
    }
}
