//! Outgoing calls placed by agents, and the consent they depend on
//!
//! The agent's browser offer is answered on an agent leg while a second
//! (provider) leg sends our own offer to the Calling API. The callee's
//! answer comes back through the `in_call` webhook; once both legs carry
//! audio they are bridged.

use super::error::{CallingError, CallingResult};
use super::manager::{CallManager, CallOutcome};
use super::session::{CallSession, MediaLeg, NewCallSession};
use crate::domain::account::{AccountRepository, WhatsAppAccount};
use crate::domain::call::{CallDirection, CallEvent, CallEventKind, CallLog, CallLogRepository};
use crate::domain::call_permission::{CallPermission, CallPermissionRepository, CallPermissionStatus};
use crate::infrastructure::media::AudioBridge;
use crate::infrastructure::protocols::webrtc::{close_peer, NegotiationError, PeerLeg, RemoteTrack};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OutgoingCallRequest {
    pub organization_id: Uuid,
    pub agent_id: Uuid,
    pub contact_id: Uuid,
    pub account_name: String,
    /// Offer from the agent's browser
    pub sdp_offer: String,
}

/// Both legs of a placed call, before the callee answers
struct Dialed {
    agent: PeerLeg,
    outbound: PeerLeg,
    sdp_answer: String,
    call_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingCall {
    pub call_log_id: Uuid,
    pub call_id: String,
    /// Answer for the agent's browser
    pub sdp_answer: String,
}

impl CallManager {
    /// Place a call to a contact on behalf of an agent
    pub async fn make_outgoing_call(self: &Arc<Self>, request: OutgoingCallRequest) -> CallingResult<OutgoingCall> {
        if !self.config.enabled {
            return Err(CallingError::Disabled);
        }
        let organization_id = request.organization_id;
        let account = self
            .accounts
            .get_account(organization_id, &request.account_name)
            .await?
            .ok_or_else(|| CallingError::AccountNotFound(request.account_name.clone()))?;
        let contact = self
            .accounts
            .get_contact(organization_id, request.contact_id)
            .await?
            .ok_or(CallingError::ContactNotFound(request.contact_id))?;
        self.ensure_permission(organization_id, contact.id).await?;

        let mut log = CallLog::pending_outgoing(organization_id, &account.name, contact.id, &contact.phone_number);
        log.agent_id = Some(request.agent_id);
        self.call_logs.create(&log).await?;

        let Dialed {
            agent,
            outbound,
            sdp_answer,
            call_id,
        } = match self.dial(&account, &contact.phone_number, &request.sdp_offer).await {
            Ok(dialed) => dialed,
            Err(e) => {
                self.fail_outgoing_log(&mut log, &e).await;
                return Err(e);
            }
        };

        log.assign_call_id(&call_id);
        if let Err(e) = self.call_logs.update(&log).await {
            self.abort_outgoing(&account, &call_id, &[&agent, &outbound]).await;
            let e = CallingError::from(e);
            self.fail_outgoing_log(&mut log, &e).await;
            return Err(e);
        }

        let (answer_tx, answer_rx) = oneshot::channel();
        let session = Arc::new(CallSession::new(NewCallSession {
            call_id: call_id.clone(),
            account: account.clone(),
            direction: CallDirection::Outgoing,
            caller_phone: contact.phone_number.clone(),
            contact_id: contact.id,
            call_log_id: log.id,
            agent_id: Some(request.agent_id),
            target_phone: Some(contact.phone_number.clone()),
            dtmf_buffer_size: self.config.dtmf_buffer_size,
        }));
        {
            let mut state = session.state().await;
            state.answer_tx = Some(answer_tx);
            state.agent = Some(MediaLeg::new(Some(agent.peer.clone()), agent.local_track.clone()));
            state.outbound = Some(MediaLeg::new(Some(outbound.peer.clone()), outbound.local_track.clone()));
        }
        if let Err(e) = self.registry.create(session.clone()).await {
            self.abort_outgoing(&account, &call_id, &[&agent, &outbound]).await;
            self.fail_outgoing_log(&mut log, &e).await;
            return Err(e);
        }

        info!(
            "Agent {} calling {} as call {}",
            request.agent_id, contact.phone_number, call_id
        );
        metrics::counter!("calling_calls_total", "direction" => "outgoing").increment(1);

        session.spawn(agent.rtcp_drain(session.shutdown.clone()));
        session.spawn(outbound.rtcp_drain(session.shutdown.clone()));
        let manager = self.clone();
        let task_session = session.clone();
        session.spawn(async move { manager.run_outbound(task_session, agent, outbound, answer_rx).await });

        Ok(OutgoingCall {
            call_log_id: log.id,
            call_id,
            sdp_answer,
        })
    }

    /// Answer the agent's offer and place the call with the provider
    async fn dial(&self, account: &WhatsAppAccount, phone_number: &str, sdp_offer: &str) -> CallingResult<Dialed> {
        let agent = self.negotiator.new_peer_leg("agent").await?;
        let timeout = self.config.negotiation_timeout();
        let sdp_answer = match tokio::time::timeout(timeout, self.negotiator.answer_offer(&agent, sdp_offer)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                close_legs(&[&agent]).await;
                return Err(e.into());
            }
            Err(_) => {
                close_legs(&[&agent]).await;
                return Err(NegotiationError::Timeout {
                    stage: "agent SDP answer",
                    after: timeout,
                }
                .into());
            }
        };

        let outbound = match self.negotiator.new_peer_leg("outbound").await {
            Ok(leg) => leg,
            Err(e) => {
                close_legs(&[&agent]).await;
                return Err(e.into());
            }
        };
        let started = std::time::Instant::now();
        let call_id = match self
            .negotiator
            .negotiate_outbound(&outbound, self.provider.as_ref(), account, phone_number, &CancellationToken::new())
            .await
        {
            Ok(call_id) => {
                metrics::histogram!("calling_negotiation_seconds", "direction" => "outgoing")
                    .record(started.elapsed().as_secs_f64());
                call_id
            }
            Err(e) => {
                warn!("Outgoing call to {} failed: {}", phone_number, e);
                close_legs(&[&agent, &outbound]).await;
                return Err(e.into());
            }
        };

        Ok(Dialed {
            agent,
            outbound,
            sdp_answer,
            call_id,
        })
    }

    async fn fail_outgoing_log(&self, log: &mut CallLog, error: &CallingError) {
        let reason = match error {
            CallingError::Negotiation(e) => e.failure_reason(),
            other => other.to_string(),
        };
        log.mark_failed(Utc::now(), reason);
        if let Err(e) = self.call_logs.update(log).await {
            warn!("Failed to record failed outgoing call {}: {}", log.id, e);
        }
    }

    async fn abort_outgoing(&self, account: &WhatsAppAccount, call_id: &str, legs: &[&PeerLeg]) {
        if let Err(e) = self.provider.terminate(account, call_id).await {
            warn!("Failed to terminate call {}: {}", call_id, e);
        }
        close_legs(legs).await;
    }

    async fn run_outbound(
        self: Arc<Self>,
        session: Arc<CallSession>,
        mut agent: PeerLeg,
        mut outbound: PeerLeg,
        answer_rx: oneshot::Receiver<String>,
    ) {
        let (provider_remote, agent_remote) = match self
            .connect_outbound(&session, &mut agent, &mut outbound, answer_rx)
            .await
        {
            Ok(tracks) => tracks,
            Err(NegotiationError::Cancelled) => {
                debug!("Outgoing call {} cancelled", session.call_id);
                return;
            }
            Err(e) => {
                warn!("Outgoing call {} did not connect: {}", session.call_id, e);
                self.finish_call(&session, CallOutcome::Failed(e.failure_reason()), true)
                    .await;
                return;
            }
        };

        self.mark_answered(&session).await;
        session.spawn(self.clone().watch_peer(session.clone(), outbound.state.clone(), "outbound"));
        session.spawn(self.clone().watch_peer(session.clone(), agent.state.clone(), "agent"));

        let bridge = Arc::new(AudioBridge::new());
        {
            let mut state = session.state().await;
            if state.status.is_terminal() {
                return;
            }
            if let Some(leg) = state.agent.as_mut() {
                leg.remote = Some(agent_remote.track.clone());
            }
            if let Some(leg) = state.outbound.as_mut() {
                leg.remote = Some(provider_remote.track.clone());
            }
            state.bridge = Some(bridge.clone());
        }
        session.bridge_started.cancel();

        let exit = bridge
            .start(
                provider_remote.track,
                agent.local_track.clone(),
                agent_remote.track,
                outbound.local_track.clone(),
            )
            .await;
        debug!("Bridge of outgoing call {} exited: {:?}", session.call_id, exit);
        self.finish_call(&session, CallOutcome::Completed, true).await;
    }

    async fn connect_outbound(
        &self,
        session: &CallSession,
        agent: &mut PeerLeg,
        outbound: &mut PeerLeg,
        answer_rx: oneshot::Receiver<String>,
    ) -> Result<(RemoteTrack, RemoteTrack), NegotiationError> {
        let cancel = &session.shutdown;
        self.negotiator.await_outbound_answer(outbound, answer_rx, cancel).await?;
        info!("Outgoing call {} media connected", session.call_id);
        self.negotiator.wait_connected(agent, cancel).await?;
        let provider_remote = self.negotiator.await_remote_audio(outbound, cancel).await?;
        let agent_remote = self.negotiator.await_remote_audio(agent, cancel).await?;
        Ok((provider_remote, agent_remote))
    }

    pub(super) async fn handle_outgoing_event(&self, session: &Arc<CallSession>, event: CallEvent) -> CallingResult<()> {
        match event.kind {
            CallEventKind::Ringing => debug!("Callee of {} is ringing", session.call_id),
            CallEventKind::InCall => match event.sdp {
                Some(sdp) => {
                    let answer_tx = session.state().await.answer_tx.take();
                    match answer_tx {
                        Some(tx) => {
                            if tx.send(sdp).is_err() {
                                debug!("Call {} no longer waits for an answer", session.call_id);
                            }
                        }
                        None => debug!("Duplicate answer for call {}", session.call_id),
                    }
                }
                None => debug!("in_call for {} without SDP", session.call_id),
            },
            CallEventKind::Ended => self.finish_call(session, CallOutcome::Completed, false).await,
            CallEventKind::Missed | CallEventKind::Unanswered => {
                self.finish_call(session, CallOutcome::Missed, false).await
            }
            CallEventKind::Rejected => self.finish_call(session, CallOutcome::Rejected, false).await,
        }
        Ok(())
    }

    /// Hang up an outgoing call; only the agent who placed it may do so
    pub async fn hangup_outgoing_call(
        &self,
        organization_id: Uuid,
        call_log_id: Uuid,
        agent_id: Uuid,
    ) -> CallingResult<()> {
        let session = self
            .registry
            .get_by_call_log_id(call_log_id)
            .await
            .filter(|s| s.organization_id == organization_id);

        let Some(session) = session else {
            // Already ended: answer idempotently for the owner
            let log = self
                .call_logs
                .get_by_id(call_log_id)
                .await?
                .filter(|log| log.organization_id == organization_id)
                .ok_or(CallingError::CallLogNotFound(call_log_id))?;
            if log.agent_id != Some(agent_id) {
                return Err(CallingError::NotCallOwner(call_log_id));
            }
            return Ok(());
        };

        if session.direction != CallDirection::Outgoing || session.agent_id != Some(agent_id) {
            return Err(CallingError::NotCallOwner(call_log_id));
        }
        info!("Agent {} hangs up call {}", agent_id, session.call_id);
        self.finish_call(&session, CallOutcome::Completed, true).await;
        Ok(())
    }

    /// Latest consent record of a contact, with lapsed acceptances persisted
    /// as expired
    pub async fn latest_permission(
        &self,
        organization_id: Uuid,
        contact_id: Uuid,
    ) -> CallingResult<Option<CallPermission>> {
        let Some(mut permission) = self.permissions.latest_for_contact(organization_id, contact_id).await? else {
            return Ok(None);
        };
        let effective = permission.effective_status(Utc::now());
        if effective != permission.status {
            debug!("Call permission {} expired", permission.id);
            permission.status = effective;
            self.permissions.update(&permission).await?;
        }
        Ok(Some(permission))
    }

    async fn ensure_permission(&self, organization_id: Uuid, contact_id: Uuid) -> CallingResult<()> {
        match self.latest_permission(organization_id, contact_id).await? {
            Some(permission) if permission.status == CallPermissionStatus::Accepted => Ok(()),
            _ => Err(CallingError::PermissionRequired(contact_id)),
        }
    }

    /// Ask a contact for consent to be called. An empty `body` uses the
    /// provider's default text.
    pub async fn send_permission_request(
        &self,
        organization_id: Uuid,
        contact_id: Uuid,
        account_name: &str,
        body: Option<&str>,
    ) -> CallingResult<CallPermission> {
        let account = self
            .accounts
            .get_account(organization_id, account_name)
            .await?
            .ok_or_else(|| CallingError::AccountNotFound(account_name.to_string()))?;
        let contact = self
            .accounts
            .get_contact(organization_id, contact_id)
            .await?
            .ok_or(CallingError::ContactNotFound(contact_id))?;

        let message_id = self
            .provider
            .send_call_permission_request(&account, &contact.phone_number, body.unwrap_or_default())
            .await?;
        let permission = CallPermission::pending(organization_id, contact.id, &account.name, message_id);
        self.permissions.create(&permission).await?;
        info!("Requested call permission from contact {}", contact.id);
        Ok(permission)
    }

    /// Record a contact's reply to the latest permission request
    pub async fn record_permission_response(
        &self,
        organization_id: Uuid,
        contact_id: Uuid,
        accepted: bool,
    ) -> CallingResult<Option<CallPermission>> {
        let Some(mut permission) = self.permissions.latest_for_contact(organization_id, contact_id).await? else {
            warn!("Permission reply from contact {} without a request", contact_id);
            return Ok(None);
        };
        permission.respond(accepted, Utc::now());
        self.permissions.update(&permission).await?;
        Ok(Some(permission))
    }
}

async fn close_legs(legs: &[&PeerLeg]) {
    for leg in legs {
        close_peer(&leg.peer, "outgoing").await;
    }
}
