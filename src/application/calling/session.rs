//! Live call session
//!
//! A `CallSession` carries the immutable identity of one live call plus a
//! lock-protected [`SessionState`]. All mutable fields change under that
//! lock; network-level closes happen after it is released.

use crate::domain::account::WhatsAppAccount;
use crate::domain::call::{CallDirection, CallStatus, TransferStatus};
use crate::infrastructure::ivr::{DtmfBuffer, IvrMenuTree};
use crate::infrastructure::media::{AudioBridge, AudioPlayer, RtpReader, RtpWriter};
use crate::infrastructure::protocols::webrtc::{close_peer, ProviderHandshake};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::peer_connection::RTCPeerConnection;

/// How long teardown waits for session tasks to finish
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One side of the call's audio: an optional peer connection with our
/// outgoing track and, once announced, the remote audio track
#[derive(Clone)]
pub struct MediaLeg {
    pub peer: Option<Arc<RTCPeerConnection>>,
    pub local: Arc<dyn RtpWriter>,
    pub remote: Option<Arc<dyn RtpReader>>,
}

impl MediaLeg {
    pub fn new(peer: Option<Arc<RTCPeerConnection>>, local: Arc<dyn RtpWriter>) -> Self {
        Self {
            peer,
            local,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RtpReader>) -> Self {
        self.remote = Some(remote);
        self
    }
}

/// Mutable part of a session
pub struct SessionState {
    pub status: CallStatus,
    pub answered_at: Option<DateTime<Utc>>,

    pub transfer_status: TransferStatus,
    pub transfer_id: Option<Uuid>,
    /// Cancels an agent leg that is still negotiating
    pub transfer_cancel: Option<CancellationToken>,

    pub caller: Option<MediaLeg>,
    pub agent: Option<MediaLeg>,
    /// Provider leg of an outgoing call
    pub outbound: Option<MediaLeg>,

    pub bridge: Option<Arc<AudioBridge>>,
    pub hold_player: Option<Arc<AudioPlayer>>,
    pub prompt_player: Option<Arc<AudioPlayer>>,

    pub ivr: Option<Arc<IvrMenuTree>>,
    /// Stops the IVR runner without ending the call
    pub ivr_cancel: Option<CancellationToken>,

    /// Delivers the callee's SDP answer on outgoing calls
    pub answer_tx: Option<oneshot::Sender<String>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: CallStatus::Ringing,
            answered_at: None,
            transfer_status: TransferStatus::None,
            transfer_id: None,
            transfer_cancel: None,
            caller: None,
            agent: None,
            outbound: None,
            bridge: None,
            hold_player: None,
            prompt_player: None,
            ivr: None,
            ivr_cancel: None,
            answer_tx: None,
        }
    }
}

/// Parameters for a new session
#[derive(Debug, Clone)]
pub struct NewCallSession {
    pub call_id: String,
    pub account: WhatsAppAccount,
    pub direction: CallDirection,
    pub caller_phone: String,
    pub contact_id: Uuid,
    pub call_log_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub target_phone: Option<String>,
    pub dtmf_buffer_size: usize,
}

pub struct CallSession {
    pub call_id: String,
    pub organization_id: Uuid,
    pub account: WhatsAppAccount,
    pub direction: CallDirection,
    pub caller_phone: String,
    pub contact_id: Uuid,
    pub call_log_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub target_phone: Option<String>,
    pub started_at: DateTime<Utc>,

    pub dtmf: Arc<DtmfBuffer>,
    /// Cancelled once when the session is torn down
    pub shutdown: CancellationToken,
    /// Cancelled when the audio bridge takes over the caller's track
    pub bridge_started: CancellationToken,

    /// Provider handshake of an inbound call, advanced step by step while
    /// negotiation runs so teardown can read it at any time
    handshake: watch::Sender<ProviderHandshake>,
    state: Mutex<SessionState>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl CallSession {
    pub fn new(params: NewCallSession) -> Self {
        Self {
            organization_id: params.account.organization_id,
            call_id: params.call_id,
            account: params.account,
            direction: params.direction,
            caller_phone: params.caller_phone,
            contact_id: params.contact_id,
            call_log_id: params.call_log_id,
            agent_id: params.agent_id,
            target_phone: params.target_phone,
            started_at: Utc::now(),
            dtmf: Arc::new(DtmfBuffer::new(params.dtmf_buffer_size)),
            shutdown: CancellationToken::new(),
            bridge_started: CancellationToken::new(),
            handshake: watch::channel(ProviderHandshake::NotStarted).0,
            state: Mutex::new(SessionState::new()),
            tasks: StdMutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Lock the mutable session state
    pub async fn state(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    pub fn handshake(&self) -> ProviderHandshake {
        *self.handshake.borrow()
    }

    pub fn set_handshake(&self, handshake: ProviderHandshake) {
        self.handshake.send_replace(handshake);
    }

    /// Sender the negotiator advances as the provider handshake progresses
    pub fn handshake_tracker(&self) -> &watch::Sender<ProviderHandshake> {
        &self.handshake
    }

    /// Spawn a task owned by this session; it is joined during teardown
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Release every resource the session holds. Safe to call repeatedly;
    /// only the first call does any work.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Tearing down call session {}", self.call_id);
        self.shutdown.cancel();

        let (bridge, players, transfer_cancel, ivr_cancel, peers) = {
            let mut state = self.state.lock().await;
            let players: Vec<Arc<AudioPlayer>> = [state.hold_player.take(), state.prompt_player.take()]
                .into_iter()
                .flatten()
                .collect();
            let peers: Vec<(&'static str, Arc<RTCPeerConnection>)> = [
                ("caller", state.caller.take()),
                ("agent", state.agent.take()),
                ("outbound", state.outbound.take()),
            ]
            .into_iter()
            .filter_map(|(label, leg)| leg.and_then(|leg| leg.peer).map(|peer| (label, peer)))
            .collect();
            state.answer_tx.take();
            (
                state.bridge.take(),
                players,
                state.transfer_cancel.take(),
                state.ivr_cancel.take(),
                peers,
            )
        };

        if let Some(bridge) = bridge {
            bridge.stop();
        }
        for player in players {
            player.stop();
        }
        if let Some(cancel) = transfer_cancel {
            cancel.cancel();
        }
        if let Some(cancel) = ivr_cancel {
            cancel.cancel();
        }
        for (label, peer) in peers {
            close_peer(&peer, label).await;
        }
        self.dtmf.close();

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = match self.tasks.lock() {
                Ok(tasks) => tasks,
                Err(poisoned) => poisoned.into_inner(),
            };
            tasks.drain(..).collect()
        };
        if handles.is_empty() {
            return;
        }

        // Teardown may run on one of these tasks, so join from a reaper
        let call_id = self.call_id.clone();
        tokio::spawn(async move {
            for handle in handles {
                if tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await.is_err() {
                    warn!("Task of call {} did not stop within {:?}", call_id, TASK_JOIN_TIMEOUT);
                }
            }
            debug!("All tasks of call {} finished", call_id);
        });
    }
}
