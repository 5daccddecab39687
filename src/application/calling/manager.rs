//! Call manager: drives live calls from the first webhook to cleanup
//!
//! Inbound calls are negotiated, answered and handed to the IVR; the IVR
//! may queue the caller for an agent, and an agent accepting the transfer
//! gets its own peer connection bridged to the caller. Every path that ends
//! a call goes through [`CallManager::finish_call`], which releases the
//! provider side, writes the final call log state, and tears the session
//! down.

use super::error::{CallingError, CallingResult};
use super::flow_engine::{FlowEngine, FlowHandoff};
use super::ivr::{run_ivr, FilePromptPlayer, IvrExit, PromptPlayer};
use super::registry::CallSessionRegistry;
use super::session::{CallSession, MediaLeg, NewCallSession};
use super::transfer::{TransferOrchestrator, TransferRequest};
use crate::config::CallingConfig;
use crate::domain::account::{AccountRepository, Contact, WhatsAppAccount};
use crate::domain::agent_transfer::{AgentDirectory, AgentTransfer, AgentTransferRepository};
use crate::domain::call::{
    CallDirection, CallEvent, CallEventKind, CallLog, CallLogRepository, CallStatus, TransferStatus,
};
use crate::domain::call_permission::CallPermissionRepository;
use crate::domain::ivr_flow::IvrFlowRepository;
use crate::infrastructure::ivr::{run_audio_drain, run_dtmf_reader, IvrMenuTree};
use crate::infrastructure::media::AudioPlayer;
use crate::infrastructure::messaging::{EventBroadcaster, Notification};
use crate::infrastructure::protocols::webrtc::{
    close_peer, NegotiationError, PeerLeg, ProviderHandshake, RemoteTrack, RemoteTrackKind, TeardownAction,
    WebRtcNegotiator, TELEPHONE_EVENT_PAYLOAD_TYPE,
};
use crate::infrastructure::whatsapp::CallingProvider;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// External collaborators of the call manager
#[derive(Clone)]
pub struct CallingPorts {
    pub provider: Arc<dyn CallingProvider>,
    pub call_logs: Arc<dyn CallLogRepository>,
    pub transfers: Arc<dyn AgentTransferRepository>,
    pub permissions: Arc<dyn CallPermissionRepository>,
    pub ivr_flows: Arc<dyn IvrFlowRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub directory: Arc<dyn AgentDirectory>,
    pub flow_engine: Arc<dyn FlowEngine>,
}

/// A ringing inbound call as delivered by webhook ingestion
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub account: WhatsAppAccount,
    pub contact: Contact,
    pub call_id: String,
    pub sdp_offer: String,
}

/// How a call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Completed,
    Missed,
    Rejected,
    Failed(String),
}

impl CallOutcome {
    pub fn status(&self) -> CallStatus {
        match self {
            CallOutcome::Completed => CallStatus::Completed,
            CallOutcome::Missed => CallStatus::Missed,
            CallOutcome::Rejected => CallStatus::Rejected,
            CallOutcome::Failed(_) => CallStatus::Failed,
        }
    }

    fn apply(&self, log: &mut CallLog, at: DateTime<Utc>) -> crate::domain::Result<()> {
        match self {
            CallOutcome::Completed => log.mark_completed(at),
            CallOutcome::Missed => log.mark_missed(at),
            // A callee hanging up after pickup is reported as rejected by some clients
            CallOutcome::Rejected => log.mark_rejected(at).or_else(|_| log.mark_completed(at)),
            CallOutcome::Failed(reason) => {
                log.mark_failed(at, reason.clone());
                Ok(())
            }
        }
    }
}

pub struct CallManager {
    pub(super) config: CallingConfig,
    pub(super) provider: Arc<dyn CallingProvider>,
    pub(super) call_logs: Arc<dyn CallLogRepository>,
    pub(super) permissions: Arc<dyn CallPermissionRepository>,
    pub(super) ivr_flows: Arc<dyn IvrFlowRepository>,
    pub(super) accounts: Arc<dyn AccountRepository>,
    pub(super) flow_engine: Arc<dyn FlowEngine>,
    pub(super) registry: Arc<CallSessionRegistry>,
    pub(super) negotiator: WebRtcNegotiator,
    pub(super) transfers: TransferOrchestrator,
    pub(super) events: Arc<EventBroadcaster>,
}

impl CallManager {
    pub fn new(config: CallingConfig, ports: CallingPorts, events: Arc<EventBroadcaster>) -> Arc<Self> {
        let registry = Arc::new(CallSessionRegistry::new());
        let transfers = TransferOrchestrator::new(
            config.clone(),
            ports.transfers,
            ports.directory,
            ports.call_logs.clone(),
            registry.clone(),
            events.clone(),
        );
        Arc::new(Self {
            negotiator: WebRtcNegotiator::new(config.clone()),
            config,
            provider: ports.provider,
            call_logs: ports.call_logs,
            permissions: ports.permissions,
            ivr_flows: ports.ivr_flows,
            accounts: ports.accounts,
            flow_engine: ports.flow_engine,
            registry,
            transfers,
            events,
        })
    }

    pub fn registry(&self) -> &Arc<CallSessionRegistry> {
        &self.registry
    }

    pub fn transfers(&self) -> &TransferOrchestrator {
        &self.transfers
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    pub fn config(&self) -> &CallingConfig {
        &self.config
    }

    /// Register a ringing inbound call and start answering it in the background
    pub async fn handle_incoming_call(self: &Arc<Self>, call: IncomingCall) -> CallingResult<CallLog> {
        if !self.config.enabled {
            return Err(CallingError::Disabled);
        }
        if self.registry.get(&call.call_id).await.is_some() {
            return Err(CallingError::SessionExists(call.call_id));
        }

        let IncomingCall {
            account,
            contact,
            call_id,
            sdp_offer,
        } = call;
        let organization_id = account.organization_id;
        let (ivr_flow_id, tree) = self.load_ivr(organization_id, &account.name).await;

        let mut log = CallLog::new(
            organization_id,
            &account.name,
            &call_id,
            contact.id,
            &contact.phone_number,
            CallDirection::Incoming,
        );
        log.ivr_flow_id = ivr_flow_id;
        self.call_logs.create(&log).await?;

        let session = Arc::new(CallSession::new(NewCallSession {
            call_id: call_id.clone(),
            account,
            direction: CallDirection::Incoming,
            caller_phone: contact.phone_number.clone(),
            contact_id: contact.id,
            call_log_id: log.id,
            agent_id: None,
            target_phone: None,
            dtmf_buffer_size: self.config.dtmf_buffer_size,
        }));
        session.state().await.ivr = tree;
        self.registry.create(session.clone()).await?;

        info!("Incoming call {} from {} (IVR flow: {:?})", call_id, contact.phone_number, ivr_flow_id);
        metrics::counter!("calling_calls_total", "direction" => "incoming").increment(1);
        self.events.publish(
            organization_id,
            Notification::CallIncoming {
                call_log_id: log.id,
                call_id,
                caller_phone: contact.phone_number,
                contact_id: contact.id,
                ivr_flow_id,
                started_at: log.started_at,
            },
        );

        let manager = self.clone();
        let task_session = session.clone();
        session.spawn(async move { manager.run_inbound(task_session, sdp_offer).await });
        Ok(log)
    }

    async fn load_ivr(&self, organization_id: Uuid, account_name: &str) -> (Option<Uuid>, Option<Arc<IvrMenuTree>>) {
        let flow = match self.ivr_flows.active_for_account(organization_id, account_name).await {
            Ok(flow) => flow,
            Err(e) => {
                warn!("Failed to load IVR flow for account {}: {}", account_name, e);
                None
            }
        };
        let Some(flow) = flow else {
            return (None, None);
        };
        match IvrMenuTree::from_value(&flow.menu) {
            Ok(tree) => (Some(flow.id), Some(Arc::new(tree))),
            Err(e) => {
                warn!("IVR flow {} ({}) is unusable: {}", flow.id, flow.name, e);
                (None, None)
            }
        }
    }

    async fn run_inbound(self: Arc<Self>, session: Arc<CallSession>, offer: String) {
        let mut leg = match self.negotiator.new_peer_leg("caller").await {
            Ok(leg) => leg,
            Err(e) => {
                error!("Failed to create peer connection for call {}: {}", session.call_id, e);
                self.finish_call(&session, CallOutcome::Failed(e.failure_reason()), true)
                    .await;
                return;
            }
        };
        session.spawn(leg.rtcp_drain(session.shutdown.clone()));
        session.state().await.caller = Some(MediaLeg::new(Some(leg.peer.clone()), leg.local_track.clone()));
        let tracks = std::mem::replace(&mut leg.remote_tracks, mpsc::unbounded_channel().1);
        session.spawn(route_remote_tracks(session.clone(), tracks));

        let started = std::time::Instant::now();
        let result = self
            .negotiator
            .negotiate_inbound(
                &mut leg,
                &offer,
                self.provider.as_ref(),
                &session.account,
                &session.call_id,
                session.handshake_tracker(),
                &session.shutdown,
            )
            .await;

        match result {
            Ok(_) => {
                metrics::histogram!("calling_negotiation_seconds", "direction" => "incoming")
                    .record(started.elapsed().as_secs_f64());
            }
            Err(NegotiationError::Cancelled) => {
                debug!("Negotiation of call {} cancelled", session.call_id);
                return;
            }
            Err(e) => {
                warn!("Negotiation of call {} failed: {}", session.call_id, e);
                self.finish_call(&session, CallOutcome::Failed(e.failure_reason()), true)
                    .await;
                return;
            }
        }

        self.mark_answered(&session).await;
        session.spawn(self.clone().watch_peer(session.clone(), leg.state.clone(), "caller"));
        if !self.start_ivr(&session).await {
            info!("No IVR for call {}, caller waits for an agent", session.call_id);
        }
    }

    /// End the call when a peer connection fails
    pub(super) async fn watch_peer(
        self: Arc<Self>,
        session: Arc<CallSession>,
        mut state: watch::Receiver<RTCPeerConnectionState>,
        label: &'static str,
    ) {
        loop {
            tokio::select! {
                _ = session.shutdown.cancelled() => return,
                changed = state.changed() => if changed.is_err() {
                    return;
                },
            }
            let current = *state.borrow_and_update();
            if matches!(
                current,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected
            ) {
                warn!("{} peer of call {} is {}", label, session.call_id, current);
                self.finish_call(
                    &session,
                    CallOutcome::Failed(format!("{} peer connection {}", label, current)),
                    true,
                )
                .await;
                return;
            }
        }
    }

    /// Start the IVR from its root. Returns false when the call has no IVR.
    async fn start_ivr(self: &Arc<Self>, session: &Arc<CallSession>) -> bool {
        let (tree, player, cancel) = {
            let mut state = session.state().await;
            let Some(tree) = state.ivr.clone() else {
                return false;
            };
            let Some(caller) = &state.caller else {
                return false;
            };
            let player = Arc::new(AudioPlayer::new(caller.local.clone()));
            let cancel = session.shutdown.child_token();
            state.prompt_player = Some(player.clone());
            if let Some(previous) = state.ivr_cancel.replace(cancel.clone()) {
                previous.cancel();
            }
            (tree, player, cancel)
        };

        let manager = self.clone();
        let task_session = session.clone();
        let audio_dir = self.config.audio_dir.clone();
        session.spawn(async move {
            let prompts = FilePromptPlayer::new(player, audio_dir);
            let exit = run_ivr(&task_session.call_id, tree, &task_session.dtmf, &prompts, &cancel).await;
            manager.on_ivr_exit(&task_session, exit).await;
        });
        true
    }

    async fn on_ivr_exit(&self, session: &Arc<CallSession>, exit: IvrExit) {
        {
            let mut state = session.state().await;
            state.prompt_player = None;
            state.ivr_cancel = None;
        }

        match exit {
            IvrExit::Transfer { team } => {
                let team_id = team.as_deref().and_then(|team| match Uuid::parse_str(team) {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!("IVR transfer target '{}' is not a team id, using the general queue", team);
                        None
                    }
                });
                if let Err(e) = self
                    .transfers
                    .request_transfer(session, TransferRequest::from_ivr(team_id))
                    .await
                {
                    warn!("IVR transfer of call {} failed, hanging up: {:?}", session.call_id, e);
                    self.play_apology(session).await;
                    self.finish_call(session, CallOutcome::Completed, true).await;
                }
            }
            IvrExit::Hangup => self.finish_call(session, CallOutcome::Completed, true).await,
            IvrExit::GotoFlow { flow } => {
                let handoff = FlowHandoff {
                    organization_id: session.organization_id,
                    contact_id: session.contact_id,
                    account_name: session.account.name.clone(),
                    phone_number: session.caller_phone.clone(),
                    call_id: session.call_id.clone(),
                    flow,
                };
                if let Err(e) = self.flow_engine.start_flow(handoff).await {
                    warn!("Flow hand-off of call {} failed: {}", session.call_id, e);
                }
                self.finish_call(session, CallOutcome::Completed, true).await;
            }
            IvrExit::Cancelled | IvrExit::InputClosed => {
                debug!("IVR of call {} stopped", session.call_id);
            }
        }
    }

    /// Play the menu's invalid-input prompt before a hang-up the caller did
    /// not ask for
    async fn play_apology(&self, session: &CallSession) {
        let (prompt, local) = {
            let state = session.state().await;
            let prompt = state
                .ivr
                .as_ref()
                .and_then(|tree| tree.node(tree.root()).invalid_input_message.clone());
            (prompt, state.caller.as_ref().map(|caller| caller.local.clone()))
        };
        let (Some(prompt), Some(local)) = (prompt, local) else {
            return;
        };
        let prompts = FilePromptPlayer::new(Arc::new(AudioPlayer::new(local)), self.config.audio_dir.clone());
        tokio::select! {
            _ = session.shutdown.cancelled() => {}
            _ = prompts.play(&prompt) => {}
        }
    }

    /// Apply a lifecycle event from the provider webhook
    pub async fn handle_call_event(self: &Arc<Self>, call_id: &str, event: CallEvent) -> CallingResult<()> {
        let Some(session) = self.registry.get(call_id).await else {
            warn!("Dropping {} event for unknown call {}", event.kind.as_str(), call_id);
            return Err(CallingError::SessionNotFound(call_id.to_string()));
        };
        debug!("Call {} event {}", call_id, event.kind.as_str());

        if let Some(err) = &event.error {
            warn!("Call {} reported error {}: {}", call_id, err.code, err.message);
            self.finish_call(&session, CallOutcome::Failed(err.message.clone()), false)
                .await;
            return Ok(());
        }

        if session.direction == CallDirection::Outgoing {
            return self.handle_outgoing_event(&session, event).await;
        }

        match event.kind {
            CallEventKind::Ringing => {}
            CallEventKind::InCall => {
                self.mark_answered(&session).await;
            }
            CallEventKind::Ended => self.finish_call(&session, CallOutcome::Completed, false).await,
            CallEventKind::Missed | CallEventKind::Unanswered => {
                self.finish_call(&session, CallOutcome::Missed, false).await
            }
            CallEventKind::Rejected => self.finish_call(&session, CallOutcome::Rejected, false).await,
        }
        Ok(())
    }

    /// Move a ringing call to answered. Returns false when it was not ringing.
    pub(super) async fn mark_answered(&self, session: &Arc<CallSession>) -> bool {
        let answered_at = Utc::now();
        {
            let mut state = session.state().await;
            if state.status != CallStatus::Ringing {
                return false;
            }
            state.status = CallStatus::Answered;
            state.answered_at = Some(answered_at);
            self.update_log(session.call_log_id, |log| log.mark_answered(answered_at))
                .await;
        }

        info!("Call {} answered", session.call_id);
        self.events.publish(
            session.organization_id,
            Notification::CallAnswered {
                call_id: session.call_id.clone(),
                contact_id: session.contact_id,
                answered_at,
            },
        );
        true
    }

    /// End a call: settle its transfer, release the provider side when
    /// `notify_provider` is set, record the outcome and tear the session down.
    /// Only the first call for a session has any effect.
    pub async fn finish_call(&self, session: &Arc<CallSession>, outcome: CallOutcome, notify_provider: bool) {
        let transfer_status = session.state().await.transfer_status;
        let settled = match transfer_status {
            TransferStatus::Waiting => self.transfers.abandon(session).await.map(|_| ()),
            TransferStatus::Connected => self.transfers.end_transfer(session).await.map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = settled {
            warn!("Failed to settle transfer of call {}: {}", session.call_id, e);
        }

        let ended_at = Utc::now();
        let log = {
            let mut state = session.state().await;
            if state.status.is_terminal() {
                debug!("Call {} already finished", session.call_id);
                return;
            }
            state.status = outcome.status();
            self.update_log(session.call_log_id, |log| outcome.apply(log, ended_at))
                .await
        };

        if notify_provider {
            self.release_provider(session).await;
        }

        match &outcome {
            CallOutcome::Failed(reason) => {
                warn!("Call {} failed: {}", session.call_id, reason);
                metrics::counter!("calling_calls_failed_total").increment(1);
            }
            other => info!("Call {} ended as {}", session.call_id, other.status()),
        }
        self.events.publish(
            session.organization_id,
            Notification::CallEnded {
                call_id: session.call_id.clone(),
                contact_id: session.contact_id,
                status: log
                    .as_ref()
                    .map(|log| log.status)
                    .unwrap_or_else(|| outcome.status())
                    .to_string(),
                duration_secs: log.as_ref().and_then(|log| log.duration_secs),
                ended_at,
            },
        );

        self.registry.delete(&session.call_id).await;
    }

    async fn release_provider(&self, session: &CallSession) {
        let action = match session.direction {
            CallDirection::Incoming => session.handshake().teardown_action(),
            CallDirection::Outgoing => Some(TeardownAction::Terminate),
        };
        let result = match action {
            Some(TeardownAction::Reject) => {
                let result = self.provider.reject(&session.account, &session.call_id).await;
                session.set_handshake(ProviderHandshake::Rejected);
                result
            }
            Some(TeardownAction::Terminate) => self.provider.terminate(&session.account, &session.call_id).await,
            None => return,
        };
        if let Err(e) = result {
            warn!("Failed to release call {} at the provider: {}", session.call_id, e);
        }
    }

    /// Read-modify-write of a call log. Failures are logged; the call
    /// continues either way.
    pub(super) async fn update_log(
        &self,
        call_log_id: Uuid,
        change: impl FnOnce(&mut CallLog) -> crate::domain::Result<()>,
    ) -> Option<CallLog> {
        let mut log = match self.call_logs.get_by_id(call_log_id).await {
            Ok(Some(log)) => log,
            Ok(None) => {
                warn!("Call log {} not found", call_log_id);
                return None;
            }
            Err(e) => {
                warn!("Failed to load call log {}: {}", call_log_id, e);
                return None;
            }
        };
        if let Err(e) = change(&mut log) {
            warn!("Call log {} not updated: {}", call_log_id, e);
            return Some(log);
        }
        if let Err(e) = self.call_logs.update(&log).await {
            warn!("Failed to save call log {}: {}", call_log_id, e);
        }
        Some(log)
    }

    /// Answer an agent's SDP offer for a transfer assigned to them. Media is
    /// bridged in the background once the agent's connection is up.
    pub async fn accept_transfer(
        self: &Arc<Self>,
        organization_id: Uuid,
        transfer_id: Uuid,
        agent_id: Uuid,
        sdp_offer: &str,
    ) -> CallingResult<String> {
        let (_transfer, session) = self.transfers.claim(organization_id, transfer_id, agent_id).await?;
        let leg = self.negotiator.new_peer_leg("agent").await?;

        let timeout = self.config.negotiation_timeout();
        let answer = match tokio::time::timeout(timeout, self.negotiator.answer_offer(&leg, sdp_offer)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                close_peer(&leg.peer, "agent").await;
                return Err(e.into());
            }
            Err(_) => {
                close_peer(&leg.peer, "agent").await;
                return Err(NegotiationError::Timeout {
                    stage: "agent SDP answer",
                    after: timeout,
                }
                .into());
            }
        };

        let cancel = session
            .state()
            .await
            .transfer_cancel
            .clone()
            .unwrap_or_else(|| session.shutdown.child_token());
        info!("Agent {} accepted transfer {} of call {}", agent_id, transfer_id, session.call_id);
        session.spawn(leg.rtcp_drain(session.shutdown.clone()));
        session.spawn(self.clone().connect_agent(session.clone(), leg, cancel));
        Ok(answer)
    }

    async fn connect_agent(self: Arc<Self>, session: Arc<CallSession>, mut leg: PeerLeg, cancel: CancellationToken) {
        let remote = match self.await_agent_media(&mut leg, &cancel).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Agent leg of call {} did not connect: {}", session.call_id, e);
                close_peer(&leg.peer, "agent").await;
                return;
            }
        };

        let agent = MediaLeg::new(Some(leg.peer.clone()), leg.local_track.clone()).with_remote(remote.track);
        let plan = match self.transfers.connect_transfer(&session, agent).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Failed to bridge call {}: {}", session.call_id, e);
                close_peer(&leg.peer, "agent").await;
                return;
            }
        };

        let exit = plan.run().await;
        debug!("Bridge of call {} exited: {:?}", session.call_id, exit);
        self.finish_call(&session, CallOutcome::Completed, true).await;
    }

    async fn await_agent_media(
        &self,
        leg: &mut PeerLeg,
        cancel: &CancellationToken,
    ) -> Result<RemoteTrack, NegotiationError> {
        self.negotiator.wait_connected(leg, cancel).await?;
        self.negotiator.await_remote_audio(leg, cancel).await
    }

    /// Agent hangs up a connected transfer, or drops a waiting one
    pub async fn end_transfer(
        &self,
        organization_id: Uuid,
        transfer_id: Uuid,
        agent_id: Uuid,
    ) -> CallingResult<AgentTransfer> {
        let transfer = self.transfers.assigned(organization_id, transfer_id, agent_id).await?;
        if let Some(session) = self.transfers.session_for(&transfer).await {
            if let Some(ended) = self.transfers.end_transfer(&session).await? {
                return Ok(ended);
            }
            if session.state().await.transfer_id == Some(transfer_id) {
                self.finish_call(&session, CallOutcome::Completed, true).await;
            }
        }
        Ok(self.transfers.complete(organization_id, transfer_id).await?)
    }

    /// Send a queued caller back to the IVR, or hang up when there is none
    pub async fn resume_transfer(
        self: &Arc<Self>,
        organization_id: Uuid,
        transfer_id: Uuid,
        resumed_by: Option<Uuid>,
    ) -> CallingResult<AgentTransfer> {
        let (transfer, session) = self.transfers.resume(organization_id, transfer_id, resumed_by).await?;
        if let Some(session) = session {
            session.dtmf.clear().await;
            if !self.start_ivr(&session).await {
                info!("Call {} resumed without an IVR, hanging up", session.call_id);
                self.finish_call(&session, CallOutcome::Completed, true).await;
            }
        }
        Ok(transfer)
    }

    pub async fn pick_next_transfer(
        &self,
        organization_id: Uuid,
        agent_id: Uuid,
        team_id: Option<Uuid>,
    ) -> CallingResult<Option<AgentTransfer>> {
        Ok(self.transfers.pick_next(organization_id, agent_id, team_id).await?)
    }

    pub async fn return_transfers(&self, organization_id: Uuid, agent_id: Uuid) -> CallingResult<u64> {
        Ok(self.transfers.return_to_queue(organization_id, agent_id).await?)
    }

    /// End every live call, used on shutdown
    pub async fn end_all(&self) {
        for call_id in self.registry.call_ids().await {
            if let Some(session) = self.registry.get(&call_id).await {
                self.finish_call(&session, CallOutcome::Completed, true).await;
            }
        }
        self.registry.clear().await;
    }
}

/// Start a reader per remote track: telephone-events feed the DTMF buffer,
/// audio is drained until the bridge takes it over
async fn route_remote_tracks(session: Arc<CallSession>, mut tracks: mpsc::UnboundedReceiver<RemoteTrack>) {
    loop {
        let remote = tokio::select! {
            _ = session.shutdown.cancelled() => break,
            remote = tracks.recv() => match remote {
                Some(remote) => remote,
                None => break,
            },
        };

        match remote.kind {
            RemoteTrackKind::TelephoneEvent => {
                debug!("Telephone-event track on call {}", session.call_id);
                session.spawn(run_dtmf_reader(
                    session.call_id.clone(),
                    remote.track,
                    session.dtmf.clone(),
                    session.shutdown.clone(),
                ));
            }
            RemoteTrackKind::Audio => {
                debug!("Audio track on call {}", session.call_id);
                if let Some(caller) = session.state().await.caller.as_mut() {
                    caller.remote = Some(remote.track.clone());
                }
                session.spawn(run_audio_drain(
                    session.call_id.clone(),
                    remote.track,
                    session.dtmf.clone(),
                    TELEPHONE_EVENT_PAYLOAD_TYPE,
                    session.bridge_started.clone(),
                    session.shutdown.clone(),
                ));
            }
        }
    }
}
