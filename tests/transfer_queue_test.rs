//! Agent queue behavior against the in-memory store

use callwire::application::calling::{CallSessionRegistry, TransferOrchestrator};
use callwire::config::CallingConfig;
use callwire::domain::agent_transfer::{
    AgentTransferRepository, AgentTransferStatus, NewAgentTransfer, QueueSettings, TransferError, TransferSource,
};
use callwire::infrastructure::messaging::{EventBroadcaster, Notification};
use callwire::infrastructure::persistence::{
    MemoryAgentDirectory, MemoryAgentTransferRepository, MemoryCallLogRepository,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

struct Queue {
    orchestrator: Arc<TransferOrchestrator>,
    transfers: Arc<MemoryAgentTransferRepository>,
    directory: Arc<MemoryAgentDirectory>,
    events: Arc<EventBroadcaster>,
}

fn queue() -> Queue {
    let transfers = Arc::new(MemoryAgentTransferRepository::new());
    let directory = Arc::new(MemoryAgentDirectory::new());
    let events = Arc::new(EventBroadcaster::default());
    let orchestrator = Arc::new(TransferOrchestrator::new(
        CallingConfig::default(),
        transfers.clone(),
        directory.clone(),
        Arc::new(MemoryCallLogRepository::new()),
        Arc::new(CallSessionRegistry::new()),
        events.clone(),
    ));
    Queue {
        orchestrator,
        transfers,
        directory,
        events,
    }
}

fn entry(org: Uuid, team_id: Option<Uuid>) -> NewAgentTransfer {
    NewAgentTransfer {
        organization_id: org,
        contact_id: Uuid::new_v4(),
        account_name: "main".to_string(),
        phone_number: "15550001111".to_string(),
        source: TransferSource::Ivr,
        team_id,
        agent_id: None,
        call_log_id: None,
        notes: None,
        transferred_by: None,
    }
}

#[tokio::test]
async fn test_oldest_entry_is_picked_first() {
    let q = queue();
    let org = Uuid::new_v4();
    let first = q.transfers.create_active(entry(org, None)).await.unwrap();
    let second = q.transfers.create_active(entry(org, None)).await.unwrap();

    let agent_a = Uuid::new_v4();
    let agent_b = Uuid::new_v4();
    let picked_a = q.orchestrator.pick_next(org, agent_a, None).await.unwrap().unwrap();
    let picked_b = q.orchestrator.pick_next(org, agent_b, None).await.unwrap().unwrap();

    assert_eq!(picked_a.id, first.id);
    assert_eq!(picked_a.agent_id, Some(agent_a));
    assert_eq!(picked_b.id, second.id);
    assert!(q.orchestrator.pick_next(org, agent_a, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_picks_never_share_an_entry() {
    let q = queue();
    let org = Uuid::new_v4();
    for _ in 0..5 {
        q.transfers.create_active(entry(org, None)).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..10 {
        let orchestrator = q.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.pick_next(org, Uuid::new_v4(), None).await.unwrap()
        }));
    }

    let mut picked = HashSet::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(transfer) => assert!(picked.insert(transfer.id), "transfer picked twice"),
            None => empty += 1,
        }
    }
    assert_eq!(picked.len(), 5);
    assert_eq!(empty, 5);
}

#[tokio::test]
async fn test_team_scope_and_general_queue() {
    let q = queue();
    let org = Uuid::new_v4();
    let team = Uuid::new_v4();
    let other_team = Uuid::new_v4();
    let agent = Uuid::new_v4();
    q.directory.set_teams(agent, vec![team]).await;

    let foreign = q.transfers.create_active(entry(org, Some(other_team))).await.unwrap();
    let teamed = q.transfers.create_active(entry(org, Some(team))).await.unwrap();
    let general = q.transfers.create_active(entry(org, None)).await.unwrap();

    let first = q.orchestrator.pick_next(org, agent, None).await.unwrap().unwrap();
    let second = q.orchestrator.pick_next(org, agent, None).await.unwrap().unwrap();
    assert_eq!(first.id, teamed.id);
    assert_eq!(second.id, general.id);
    assert!(q.orchestrator.pick_next(org, agent, None).await.unwrap().is_none());

    let explicit = q.orchestrator.pick_next(org, agent, Some(other_team)).await.unwrap().unwrap();
    assert_eq!(explicit.id, foreign.id);
}

#[tokio::test]
async fn test_team_pickup_off_limits_agent_to_general_queue() {
    let q = queue();
    let org = Uuid::new_v4();
    let team = Uuid::new_v4();
    let agent = Uuid::new_v4();
    q.directory.set_teams(agent, vec![team]).await;
    q.directory
        .set_queue_settings(
            org,
            QueueSettings {
                allow_agent_queue_pickup: true,
                team_queue_pickup: false,
            },
        )
        .await;

    q.transfers.create_active(entry(org, Some(team))).await.unwrap();
    assert!(q.orchestrator.pick_next(org, agent, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pickup_disabled() {
    let q = queue();
    let org = Uuid::new_v4();
    q.directory
        .set_queue_settings(
            org,
            QueueSettings {
                allow_agent_queue_pickup: false,
                team_queue_pickup: true,
            },
        )
        .await;
    q.transfers.create_active(entry(org, None)).await.unwrap();

    let result = q.orchestrator.pick_next(org, Uuid::new_v4(), None).await;
    assert!(matches!(result, Err(TransferError::PickupDisabled)));
}

#[tokio::test]
async fn test_one_active_transfer_per_contact() {
    let q = queue();
    let org = Uuid::new_v4();
    let new = entry(org, None);
    let contact_id = new.contact_id;
    let first = q.transfers.create_active(new.clone()).await.unwrap();

    let duplicate = q.transfers.create_active(new.clone()).await;
    assert!(matches!(
        duplicate,
        Err(TransferError::ActiveTransferExists { contact_id: c }) if c == contact_id
    ));

    q.orchestrator.complete(org, first.id).await.unwrap();
    let again = q.transfers.create_active(new).await.unwrap();
    assert_eq!(again.status, AgentTransferStatus::Active);
}

#[tokio::test]
async fn test_returned_entries_keep_their_place() {
    let q = queue();
    let org = Uuid::new_v4();
    let agent = Uuid::new_v4();
    let first = q.transfers.create_active(entry(org, None)).await.unwrap();
    q.transfers.create_active(entry(org, None)).await.unwrap();

    q.orchestrator.pick_next(org, agent, None).await.unwrap();
    assert_eq!(q.orchestrator.return_to_queue(org, agent).await.unwrap(), 1);

    let repicked = q.orchestrator.pick_next(org, Uuid::new_v4(), None).await.unwrap().unwrap();
    assert_eq!(repicked.id, first.id);
}

#[tokio::test]
async fn test_pick_publishes_assignment() {
    let q = queue();
    let org = Uuid::new_v4();
    let agent = Uuid::new_v4();
    let mut rx = q.events.subscribe();
    let transfer = q.transfers.create_active(entry(org, None)).await.unwrap();

    q.orchestrator.pick_next(org, agent, None).await.unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.organization_id, org);
    assert_eq!(
        event.notification,
        Notification::AgentTransferAssign {
            transfer_id: transfer.id,
            contact_id: transfer.contact_id,
            agent_id: Some(agent),
        }
    );
}

#[tokio::test]
async fn test_resume_without_live_call() {
    let q = queue();
    let org = Uuid::new_v4();
    let agent = Uuid::new_v4();
    let transfer = q.transfers.create_active(entry(org, None)).await.unwrap();

    let (resumed, session) = q.orchestrator.resume(org, transfer.id, Some(agent)).await.unwrap();
    assert_eq!(resumed.status, AgentTransferStatus::Resumed);
    assert_eq!(resumed.resumed_by, Some(agent));
    assert!(session.is_none());

    let again = q.orchestrator.resume(org, transfer.id, Some(agent)).await;
    assert!(matches!(again, Err(TransferError::NotActive(id)) if id == transfer.id));
}
