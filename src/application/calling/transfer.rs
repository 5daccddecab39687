//! Transfer orchestration: hands a live call to a human agent
//!
//! A transfer moves the call's transfer sub-state `none -> waiting` while
//! the caller hears hold audio, then `waiting -> connected` once an agent
//! leg is bridged, or `waiting -> resumed` if the caller goes back to the
//! IVR. Queue ordering and single ownership live in the repository.

use super::registry::CallSessionRegistry;
use super::session::{CallSession, MediaLeg, SessionState};
use crate::config::CallingConfig;
use crate::domain::agent_transfer::{
    AgentDirectory, AgentTransfer, AgentTransferRepository, NewAgentTransfer, PickScope, TransferError,
    TransferSource,
};
use crate::domain::call::{CallLogRepository, CallStatus, TransferStatus};
use crate::domain::shared::DomainError;
use crate::infrastructure::media::{AudioBridge, AudioPlayer, RtpReader, RtpWriter};
use crate::infrastructure::messaging::{EventBroadcaster, Notification};
use crate::infrastructure::protocols::webrtc::close_peer;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Who and where to hand the call to
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: TransferSource,
    pub team_id: Option<Uuid>,
    /// Specific agent; must be available
    pub agent_id: Option<Uuid>,
    pub notes: Option<String>,
    pub transferred_by: Option<Uuid>,
}

impl TransferRequest {
    /// Queue the caller from the IVR
    pub fn from_ivr(team_id: Option<Uuid>) -> Self {
        Self {
            source: TransferSource::Ivr,
            team_id,
            agent_id: None,
            notes: None,
            transferred_by: None,
        }
    }
}

/// Tracks wired into a freshly created bridge
pub struct BridgePlan {
    pub bridge: Arc<AudioBridge>,
    pub caller_remote: Arc<dyn RtpReader>,
    pub agent_local: Arc<dyn RtpWriter>,
    pub agent_remote: Arc<dyn RtpReader>,
    pub caller_local: Arc<dyn RtpWriter>,
}

impl BridgePlan {
    /// Relay audio until either side ends or the bridge is stopped
    pub async fn run(self) -> crate::infrastructure::media::BridgeExit {
        self.bridge
            .start(self.caller_remote, self.agent_local, self.agent_remote, self.caller_local)
            .await
    }
}

pub struct TransferOrchestrator {
    config: CallingConfig,
    transfers: Arc<dyn AgentTransferRepository>,
    directory: Arc<dyn AgentDirectory>,
    call_logs: Arc<dyn CallLogRepository>,
    registry: Arc<CallSessionRegistry>,
    events: Arc<EventBroadcaster>,
}

impl TransferOrchestrator {
    pub fn new(
        config: CallingConfig,
        transfers: Arc<dyn AgentTransferRepository>,
        directory: Arc<dyn AgentDirectory>,
        call_logs: Arc<dyn CallLogRepository>,
        registry: Arc<CallSessionRegistry>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            config,
            transfers,
            directory,
            call_logs,
            registry,
            events,
        }
    }

    /// Queue an answered call for an agent and start hold audio
    pub async fn request_transfer(
        &self,
        session: &Arc<CallSession>,
        request: TransferRequest,
    ) -> Result<AgentTransfer, TransferError> {
        let organization_id = session.organization_id;
        if let Some(agent_id) = request.agent_id {
            if !self.directory.is_available(organization_id, agent_id).await? {
                return Err(TransferError::AgentUnavailable { agent_id });
            }
        }

        let mut state = session.state().await;
        if state.status != CallStatus::Answered || !state.transfer_status.can_transition_to(TransferStatus::Waiting) {
            return Err(DomainError::InvalidStateTransition(format!(
                "call {} cannot be transferred while {} / transfer {}",
                session.call_id,
                state.status,
                state.transfer_status.as_str()
            ))
            .into());
        }

        let transfer = self
            .transfers
            .create_active(NewAgentTransfer {
                organization_id,
                contact_id: session.contact_id,
                account_name: session.account.name.clone(),
                phone_number: session.caller_phone.clone(),
                source: request.source,
                team_id: request.team_id,
                agent_id: request.agent_id,
                call_log_id: Some(session.call_log_id),
                notes: request.notes,
                transferred_by: request.transferred_by,
            })
            .await?;

        state.transfer_status = TransferStatus::Waiting;
        state.transfer_id = Some(transfer.id);
        state.transfer_cancel = Some(session.shutdown.child_token());

        if let Some(caller) = &state.caller {
            let player = Arc::new(AudioPlayer::new(caller.local.clone()));
            state.hold_player = Some(player.clone());
            session.spawn(play_hold(
                session.call_id.clone(),
                player,
                self.config.hold_music.clone(),
                self.config.max_hold(),
            ));
        }
        drop(state);

        info!(
            "Call {} queued for an agent as transfer {} (team: {:?})",
            session.call_id, transfer.id, transfer.team_id
        );
        metrics::counter!("calling_transfers_requested_total").increment(1);
        self.events.publish(
            organization_id,
            Notification::AgentTransfer {
                transfer_id: transfer.id,
                contact_id: transfer.contact_id,
                phone_number: transfer.phone_number.clone(),
                team_id: transfer.team_id,
                source: transfer.source.as_str().to_string(),
            },
        );
        Ok(transfer)
    }

    /// Assign the oldest visible unassigned transfer to `agent_id`
    pub async fn pick_next(
        &self,
        organization_id: Uuid,
        agent_id: Uuid,
        team_filter: Option<Uuid>,
    ) -> Result<Option<AgentTransfer>, TransferError> {
        let settings = self.directory.queue_settings(organization_id).await?;
        if !settings.allow_agent_queue_pickup {
            return Err(TransferError::PickupDisabled);
        }

        let scope = match team_filter {
            Some(team) => PickScope::Team(team),
            None if settings.team_queue_pickup => {
                PickScope::GeneralAndTeams(self.directory.team_ids(organization_id, agent_id).await?)
            }
            None => PickScope::General,
        };

        let picked = self.transfers.pick_next(organization_id, agent_id, scope).await?;
        match &picked {
            Some(transfer) => {
                info!("Agent {} picked transfer {}", agent_id, transfer.id);
                metrics::counter!("calling_transfers_picked_total").increment(1);
                self.events.publish(
                    organization_id,
                    Notification::AgentTransferAssign {
                        transfer_id: transfer.id,
                        contact_id: transfer.contact_id,
                        agent_id: Some(agent_id),
                    },
                );
            }
            None => debug!("Queue empty for agent {}", agent_id),
        }
        Ok(picked)
    }

    /// Put every transfer the agent holds back into the queue
    pub async fn return_to_queue(&self, organization_id: Uuid, agent_id: Uuid) -> Result<u64, TransferError> {
        let count = self.transfers.return_to_queue(organization_id, agent_id).await?;
        if count > 0 {
            info!("Returned {} transfers of agent {} to the queue", count, agent_id);
        }
        Ok(count)
    }

    /// Resolve a transfer assigned to `agent_id` to its waiting call
    pub async fn claim(
        &self,
        organization_id: Uuid,
        transfer_id: Uuid,
        agent_id: Uuid,
    ) -> Result<(AgentTransfer, Arc<CallSession>), TransferError> {
        let transfer = self.assigned(organization_id, transfer_id, agent_id).await?;
        let session = self
            .session_for(&transfer)
            .await
            .ok_or(TransferError::CallNotWaiting(transfer_id))?;

        let state = session.state().await;
        if state.transfer_status != TransferStatus::Waiting
            || state.transfer_id != Some(transfer_id)
            || state.agent.is_some()
        {
            return Err(TransferError::CallNotWaiting(transfer_id));
        }
        drop(state);
        Ok((transfer, session))
    }

    /// Record the connection, then stop hold audio and wire caller and
    /// agent tracks into a new bridge. The caller runs the returned plan.
    ///
    /// Session state is only touched once the transfer row is saved, so a
    /// failed write leaves the caller waiting on hold.
    pub async fn connect_transfer(
        &self,
        session: &Arc<CallSession>,
        agent: MediaLeg,
    ) -> Result<BridgePlan, TransferError> {
        let transfer_id = {
            let state = session.state().await;
            waiting_tracks(&state, &agent)?;
            state.transfer_id.unwrap_or_default()
        };

        let mut transfer = self
            .transfers
            .get(session.organization_id, transfer_id)
            .await?
            .ok_or(TransferError::NotFound(transfer_id))?;
        transfer.mark_connected(Utc::now())?;
        self.transfers.update(&transfer).await?;

        let plan = {
            let mut state = session.state().await;
            let tracks = waiting_tracks(&state, &agent);
            let (caller_local, caller_remote, agent_remote) = match tracks {
                Ok(tracks) if state.transfer_id == Some(transfer_id) => tracks,
                _ => {
                    drop(state);
                    warn!("Call {} left the queue while transfer {} connected", session.call_id, transfer_id);
                    if let Err(e) = self.complete(session.organization_id, transfer_id).await {
                        warn!("Failed to close transfer {}: {}", transfer_id, e);
                    }
                    return Err(TransferError::CallNotWaiting(transfer_id));
                }
            };

            if let Some(hold) = state.hold_player.take() {
                hold.stop();
            }
            let bridge = Arc::new(AudioBridge::new());
            state.bridge = Some(bridge.clone());
            state.transfer_status = TransferStatus::Connected;
            let agent_local = agent.local.clone();
            state.agent = Some(agent);

            BridgePlan {
                bridge,
                caller_remote,
                agent_local,
                agent_remote,
                caller_local,
            }
        };

        // The audio drain releases the caller's track to the bridge
        session.bridge_started.cancel();

        let log = match self.call_logs.get_by_id(session.call_log_id).await {
            Ok(log) => log,
            Err(e) => {
                warn!("Failed to load call log {}: {}", session.call_log_id, e);
                None
            }
        };
        if let Some(mut log) = log {
            log.agent_id = transfer.agent_id;
            log.updated_at = Utc::now();
            if let Err(e) = self.call_logs.update(&log).await {
                warn!("Failed to record agent on call log {}: {}", log.id, e);
            }
        }

        info!("Transfer {} connected call {} to agent {:?}", transfer_id, session.call_id, transfer.agent_id);
        Ok(plan)
    }

    /// Stop the bridge of a connected transfer and record talk time.
    /// Returns `None` when the call has no connected transfer.
    pub async fn end_transfer(&self, session: &Arc<CallSession>) -> Result<Option<AgentTransfer>, TransferError> {
        let (bridge, agent, transfer_id) = {
            let mut state = session.state().await;
            if state.transfer_status != TransferStatus::Connected {
                return Ok(None);
            }
            state.transfer_status = TransferStatus::None;
            state.transfer_cancel = None;
            (state.bridge.take(), state.agent.take(), state.transfer_id.take())
        };

        if let Some(bridge) = bridge {
            bridge.stop();
        }
        if let Some(peer) = agent.and_then(|leg| leg.peer) {
            close_peer(&peer, "agent").await;
        }

        let Some(transfer_id) = transfer_id else {
            return Ok(None);
        };
        self.complete(session.organization_id, transfer_id).await.map(Some)
    }

    /// Mark a transfer completed without a live call
    pub async fn complete(&self, organization_id: Uuid, transfer_id: Uuid) -> Result<AgentTransfer, TransferError> {
        let mut transfer = self
            .transfers
            .get(organization_id, transfer_id)
            .await?
            .ok_or(TransferError::NotFound(transfer_id))?;
        if !transfer.is_active() {
            return Ok(transfer);
        }
        transfer.complete(Utc::now());
        self.transfers.update(&transfer).await?;
        info!(
            "Transfer {} completed, talk time {:?}s",
            transfer.id, transfer.talk_duration_secs
        );
        Ok(transfer)
    }

    /// The caller hung up while waiting: release the queue entry.
    /// Returns `None` when the call was not waiting.
    pub async fn abandon(&self, session: &Arc<CallSession>) -> Result<Option<AgentTransfer>, TransferError> {
        let transfer_id = {
            let mut state = session.state().await;
            if state.transfer_status != TransferStatus::Waiting {
                return Ok(None);
            }
            if let Some(hold) = state.hold_player.take() {
                hold.stop();
            }
            if let Some(cancel) = state.transfer_cancel.take() {
                cancel.cancel();
            }
            state.transfer_status = TransferStatus::None;
            state.transfer_id.take()
        };

        let Some(transfer_id) = transfer_id else {
            return Ok(None);
        };
        let mut transfer = self
            .transfers
            .get(session.organization_id, transfer_id)
            .await?
            .ok_or(TransferError::NotFound(transfer_id))?;
        if transfer.is_active() {
            transfer.abandon(Utc::now());
            self.transfers.update(&transfer).await?;
        }
        info!("Caller of call {} abandoned transfer {}", session.call_id, transfer_id);
        Ok(Some(transfer))
    }

    /// Send a queued contact back to automation. The returned session, if
    /// any, was waiting on hold and is now `resumed`.
    pub async fn resume(
        &self,
        organization_id: Uuid,
        transfer_id: Uuid,
        resumed_by: Option<Uuid>,
    ) -> Result<(AgentTransfer, Option<Arc<CallSession>>), TransferError> {
        let mut transfer = self
            .transfers
            .get(organization_id, transfer_id)
            .await?
            .ok_or(TransferError::NotFound(transfer_id))?;
        transfer.resume(resumed_by, Utc::now())?;
        self.transfers.update(&transfer).await?;

        let mut resumed_session = None;
        if let Some(session) = self.session_for(&transfer).await {
            let mut state = session.state().await;
            if state.transfer_status == TransferStatus::Waiting && state.transfer_id == Some(transfer_id) {
                if let Some(hold) = state.hold_player.take() {
                    hold.stop();
                }
                if let Some(cancel) = state.transfer_cancel.take() {
                    cancel.cancel();
                }
                state.transfer_status = TransferStatus::Resumed;
                state.transfer_id = None;
                drop(state);
                resumed_session = Some(session);
            }
        }

        info!("Transfer {} resumed", transfer_id);
        self.events.publish(
            organization_id,
            Notification::AgentTransferResume {
                transfer_id,
                contact_id: transfer.contact_id,
            },
        );
        Ok((transfer, resumed_session))
    }

    /// Active transfers in queue order
    pub async fn list_active(&self, organization_id: Uuid) -> Result<Vec<AgentTransfer>, TransferError> {
        Ok(self.transfers.list_active(organization_id).await?)
    }

    /// Fetch a transfer that must be active and assigned to `agent_id`
    pub async fn assigned(
        &self,
        organization_id: Uuid,
        transfer_id: Uuid,
        agent_id: Uuid,
    ) -> Result<AgentTransfer, TransferError> {
        let transfer = self
            .transfers
            .get(organization_id, transfer_id)
            .await?
            .ok_or(TransferError::NotFound(transfer_id))?;
        if !transfer.is_active() {
            return Err(TransferError::NotActive(transfer_id));
        }
        if transfer.agent_id != Some(agent_id) {
            return Err(TransferError::NotAssigned { transfer_id, agent_id });
        }
        Ok(transfer)
    }

    pub async fn session_for(&self, transfer: &AgentTransfer) -> Option<Arc<CallSession>> {
        let call_log_id = transfer.call_log_id?;
        self.registry
            .get_by_call_log_id(call_log_id)
            .await
            .filter(|s| s.organization_id == transfer.organization_id)
    }
}

/// Caller tracks and agent remote of a call still waiting for its agent
fn waiting_tracks(
    state: &SessionState,
    agent: &MediaLeg,
) -> Result<(Arc<dyn RtpWriter>, Arc<dyn RtpReader>, Arc<dyn RtpReader>), TransferError> {
    let transfer_id = state.transfer_id.unwrap_or_default();
    if state.transfer_status != TransferStatus::Waiting {
        return Err(TransferError::CallNotWaiting(transfer_id));
    }
    let (caller_local, caller_remote) = match &state.caller {
        Some(MediaLeg {
            local,
            remote: Some(remote),
            ..
        }) => (local.clone(), remote.clone()),
        _ => return Err(TransferError::CallNotWaiting(transfer_id)),
    };
    let agent_remote = agent.remote.clone().ok_or(TransferError::CallNotWaiting(transfer_id))?;
    Ok((caller_local, caller_remote, agent_remote))
}

/// Loop hold music (or silence) to the waiting caller, for at most `max_hold`
async fn play_hold(call_id: String, player: Arc<AudioPlayer>, hold_music: Option<PathBuf>, max_hold: Duration) {
    let playback = async {
        if let Some(path) = &hold_music {
            match player.play_file_loop(path).await {
                Ok(()) => return,
                Err(e) => warn!("Hold music {} unusable for call {}: {}", path.display(), call_id, e),
            }
        }
        if let Err(e) = player.play_silence(max_hold).await {
            debug!("Hold silence for call {} ended: {}", call_id, e);
        }
    };

    if tokio::time::timeout(max_hold, playback).await.is_err() {
        warn!("Call {} has been on hold for {:?}", call_id, max_hold);
    }
    player.stop();
}
