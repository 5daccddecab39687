/// WebRTC negotiation with the calling provider
///
/// Builds Opus + telephone-event peer connections and runs the SDP
/// offer/answer exchange for inbound (provider offers) and outbound
/// (we offer) calls, including the provider's pre-accept/accept handshake.
use crate::config::{CallingConfig, IceServerConfig};
use crate::domain::account::WhatsAppAccount;
use crate::infrastructure::whatsapp::{CallingProvider, ProviderError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

pub const OPUS_PAYLOAD_TYPE: u8 = 111;
pub const TELEPHONE_EVENT_PAYLOAD_TYPE: u8 = 101;
pub const MIME_TYPE_TELEPHONE_EVENT: &str = "audio/telephone-event";

/// Negotiation errors
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("peer connection setup failed: {0}")]
    Setup(String),

    #[error("SDP exchange failed: {0}")]
    Sdp(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("no local description after ICE gathering")]
    NoLocalDescription,

    #[error("provider {step} failed: {source}")]
    Provider {
        step: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("answer channel closed before the callee answered")]
    AnswerChannelClosed,

    #[error("media transport {0}")]
    Transport(String),

    #[error("negotiation cancelled")]
    Cancelled,
}

impl NegotiationError {
    /// Text recorded on the call log
    pub fn failure_reason(&self) -> String {
        match self {
            NegotiationError::Provider { source, .. } => source.failure_reason(),
            other => other.to_string(),
        }
    }
}

fn setup_err(e: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::Setup(e.to_string())
}

fn sdp_err(e: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::Sdp(e.to_string())
}

/// Provider-side handshake of an inbound call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderHandshake {
    #[default]
    NotStarted,
    PreAccepted,
    Accepted,
    Rejected,
}

/// Provider call needed to release a call in a given handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownAction {
    Reject,
    Terminate,
}

impl ProviderHandshake {
    pub fn teardown_action(&self) -> Option<TeardownAction> {
        match self {
            ProviderHandshake::NotStarted => Some(TeardownAction::Reject),
            // A call stuck between pre-accept and accept is terminated too
            ProviderHandshake::PreAccepted | ProviderHandshake::Accepted => Some(TeardownAction::Terminate),
            ProviderHandshake::Rejected => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTrackKind {
    Audio,
    TelephoneEvent,
}

/// A remote track announced by the peer
#[derive(Clone)]
pub struct RemoteTrack {
    pub kind: RemoteTrackKind,
    pub payload_type: u8,
    pub track: Arc<TrackRemote>,
}

/// One peer connection with its outgoing audio track
pub struct PeerLeg {
    pub peer: Arc<RTCPeerConnection>,
    pub local_track: Arc<TrackLocalStaticRTP>,
    /// Sender of `local_track`; its RTCP must be drained, see [`PeerLeg::rtcp_drain`]
    pub sender: Arc<RTCRtpSender>,
    /// Remote tracks, in the order the peer announces them
    pub remote_tracks: mpsc::UnboundedReceiver<RemoteTrack>,
    /// Latest connection state
    pub state: watch::Receiver<RTCPeerConnectionState>,
}

impl PeerLeg {
    /// Read and discard incoming RTCP until the sender closes or `cancel`
    /// fires. RTCP has to be read for interceptors to run; the returned
    /// future is meant for the owning session's supervised spawn.
    pub fn rtcp_drain(&self, cancel: CancellationToken) -> impl Future<Output = ()> + Send + 'static {
        let sender = Arc::clone(&self.sender);
        async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = sender.read(&mut buf) => {
                        if read.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// WebRTC negotiator
pub struct WebRtcNegotiator {
    config: CallingConfig,
}

impl WebRtcNegotiator {
    pub fn new(config: CallingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CallingConfig {
        &self.config
    }

    /// Create a peer connection with Opus and telephone-event, one local
    /// audio track, and handlers feeding `remote_tracks` and `state`
    pub async fn new_peer_leg(&self, label: &str) -> Result<PeerLeg, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: OPUS_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(setup_err)?;
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_TELEPHONE_EVENT.to_string(),
                        clock_rate: 8000,
                        channels: 1,
                        sdp_fmtp_line: "0-15".to_string(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: TELEPHONE_EVENT_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(setup_err)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine).map_err(setup_err)?;

        let mut setting_engine = SettingEngine::default();
        let ephemeral =
            EphemeralUDP::new(self.config.udp_port_min, self.config.udp_port_max).map_err(setup_err)?;
        setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let peer = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: ice_servers(&self.config.ice_servers),
                ..Default::default()
            })
            .await
            .map_err(setup_err)?,
        );

        let local_track = Arc::new(TrackLocalStaticRTP::new(
            opus_capability(),
            "audio".to_string(),
            format!("{}-audio", label),
        ));
        let sender = peer
            .add_track(Arc::clone(&local_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(setup_err)?;

        let (tracks_tx, remote_tracks) = mpsc::unbounded_channel();
        let leg_label = label.to_string();
        peer.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let tracks_tx = tracks_tx.clone();
            let label = leg_label.clone();
            Box::pin(async move {
                let codec = track.codec();
                let kind = if codec.capability.mime_type.eq_ignore_ascii_case(MIME_TYPE_TELEPHONE_EVENT) {
                    RemoteTrackKind::TelephoneEvent
                } else {
                    RemoteTrackKind::Audio
                };
                info!(
                    "Remote track on {} leg: codec={} payload_type={}",
                    label,
                    codec.capability.mime_type,
                    track.payload_type()
                );
                let _ = tracks_tx.send(RemoteTrack {
                    kind,
                    payload_type: track.payload_type(),
                    track,
                });
            })
        }));

        let (state_tx, state) = watch::channel(RTCPeerConnectionState::New);
        let state_tx = Arc::new(state_tx);
        let leg_label = label.to_string();
        peer.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            debug!("Peer connection state on {} leg: {}", leg_label, s);
            Box::pin(async move {
                state_tx.send_replace(s);
            })
        }));

        Ok(PeerLeg {
            peer,
            local_track,
            sender,
            remote_tracks,
            state,
        })
    }

    /// Apply a remote offer and return our gathered answer SDP
    pub async fn answer_offer(&self, leg: &PeerLeg, offer_sdp: &str) -> Result<String, NegotiationError> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string()).map_err(sdp_err)?;
        leg.peer.set_remote_description(offer).await.map_err(sdp_err)?;

        let answer = leg.peer.create_answer(None).await.map_err(sdp_err)?;
        let mut gather_complete = leg.peer.gathering_complete_promise().await;
        leg.peer.set_local_description(answer).await.map_err(sdp_err)?;
        let _ = gather_complete.recv().await;

        local_sdp(leg).await
    }

    /// Create our offer and return it once ICE gathering completed
    pub async fn create_offer(&self, leg: &PeerLeg) -> Result<String, NegotiationError> {
        let offer = leg.peer.create_offer(None).await.map_err(sdp_err)?;
        let mut gather_complete = leg.peer.gathering_complete_promise().await;
        leg.peer.set_local_description(offer).await.map_err(sdp_err)?;
        let _ = gather_complete.recv().await;

        local_sdp(leg).await
    }

    pub async fn apply_answer(&self, leg: &PeerLeg, answer_sdp: &str) -> Result<(), NegotiationError> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_string()).map_err(sdp_err)?;
        leg.peer.set_remote_description(answer).await.map_err(sdp_err)
    }

    /// Inbound call: answer the provider's offer, pre-accept and accept with
    /// that answer, then wait for media connectivity.
    ///
    /// Each provider step is published on `handshake` as soon as it succeeds,
    /// so a concurrent teardown releases the call correctly.
    pub async fn negotiate_inbound(
        &self,
        leg: &mut PeerLeg,
        offer_sdp: &str,
        provider: &dyn CallingProvider,
        account: &WhatsAppAccount,
        call_id: &str,
        handshake: &watch::Sender<ProviderHandshake>,
        cancel: &CancellationToken,
    ) -> Result<String, NegotiationError> {
        let timeout = self.config.negotiation_timeout();
        let answer = bounded("SDP negotiation", timeout, cancel, async {
            let answer = self.answer_offer(leg, offer_sdp).await?;

            provider
                .pre_accept(account, call_id, &answer)
                .await
                .map_err(|source| NegotiationError::Provider {
                    step: "pre_accept",
                    source,
                })?;
            handshake.send_replace(ProviderHandshake::PreAccepted);

            provider
                .accept(account, call_id, &answer)
                .await
                .map_err(|source| NegotiationError::Provider { step: "accept", source })?;
            handshake.send_replace(ProviderHandshake::Accepted);
            Ok(answer)
        })
        .await?;

        info!("Call {} accepted, waiting for media connection", call_id);
        self.wait_connected(leg, cancel).await?;
        info!("Call {} media connected", call_id);
        Ok(answer)
    }

    /// Outbound call: send our offer to the provider and return the call id
    pub async fn negotiate_outbound(
        &self,
        leg: &PeerLeg,
        provider: &dyn CallingProvider,
        account: &WhatsAppAccount,
        phone_number: &str,
        cancel: &CancellationToken,
    ) -> Result<String, NegotiationError> {
        let timeout = self.config.negotiation_timeout();
        bounded("outgoing offer", timeout, cancel, async {
            let offer = self.create_offer(leg).await?;
            provider
                .initiate_outgoing(account, phone_number, &offer)
                .await
                .map_err(|source| NegotiationError::Provider {
                    step: "initiate",
                    source,
                })
        })
        .await
    }

    /// Wait for the callee's answer on `answer_rx`, apply it, and wait for media
    pub async fn await_outbound_answer(
        &self,
        leg: &mut PeerLeg,
        answer_rx: oneshot::Receiver<String>,
        cancel: &CancellationToken,
    ) -> Result<(), NegotiationError> {
        let timeout = self.config.outgoing_answer_timeout();
        let answer = bounded("callee answer", timeout, cancel, async {
            answer_rx.await.map_err(|_| NegotiationError::AnswerChannelClosed)
        })
        .await?;

        self.apply_answer(leg, &answer).await?;
        self.wait_connected(leg, cancel).await
    }

    /// First remote audio track of the leg, bounded by the media timeout.
    /// Telephone-event tracks announced before it are skipped.
    pub async fn await_remote_audio(
        &self,
        leg: &mut PeerLeg,
        cancel: &CancellationToken,
    ) -> Result<RemoteTrack, NegotiationError> {
        let timeout = self.config.media_connect_timeout();
        let tracks = &mut leg.remote_tracks;
        bounded("remote audio track", timeout, cancel, async move {
            while let Some(remote) = tracks.recv().await {
                if remote.kind == RemoteTrackKind::Audio {
                    return Ok(remote);
                }
            }
            Err(NegotiationError::Transport("peer closed before announcing audio".to_string()))
        })
        .await
    }

    /// Block until the leg reports `connected`, bounded by the media timeout
    pub async fn wait_connected(&self, leg: &mut PeerLeg, cancel: &CancellationToken) -> Result<(), NegotiationError> {
        let timeout = self.config.media_connect_timeout();
        let state = &mut leg.state;
        bounded("media connection", timeout, cancel, async move {
            loop {
                let current = *state.borrow_and_update();
                match current {
                    RTCPeerConnectionState::Connected => return Ok(()),
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                        return Err(NegotiationError::Transport(current.to_string()));
                    }
                    _ => {}
                }
                if state.changed().await.is_err() {
                    return Err(NegotiationError::Transport("state channel closed".to_string()));
                }
            }
        })
        .await
    }
}

async fn local_sdp(leg: &PeerLeg) -> Result<String, NegotiationError> {
    leg.peer
        .local_description()
        .await
        .map(|desc| desc.sdp)
        .filter(|sdp| !sdp.is_empty())
        .ok_or(NegotiationError::NoLocalDescription)
}

async fn bounded<T>(
    stage: &'static str,
    after: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, NegotiationError>>,
) -> Result<T, NegotiationError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(NegotiationError::Cancelled),
        result = tokio::time::timeout(after, fut) => match result {
            Ok(inner) => inner,
            Err(_) => {
                warn!("{} timed out after {:?}", stage, after);
                Err(NegotiationError::Timeout { stage, after })
            }
        },
    }
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

fn ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Close a peer connection, logging instead of failing
pub async fn close_peer(peer: &RTCPeerConnection, label: &str) {
    if let Err(e) = peer.close().await {
        warn!("Failed to close {} peer connection: {}", label, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::whatsapp::client::MockCallingProvider;
    use crate::infrastructure::whatsapp::ApiError;
    use uuid::Uuid;

    fn negotiator() -> WebRtcNegotiator {
        WebRtcNegotiator::new(CallingConfig {
            ice_servers: vec![],
            negotiation_timeout_secs: 5,
            media_connect_timeout_secs: 1,
            ..CallingConfig::default()
        })
    }

    fn account() -> WhatsAppAccount {
        WhatsAppAccount {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "support".to_string(),
            phone_id: "1099".to_string(),
            business_id: "2088".to_string(),
            api_version: "v21.0".to_string(),
            access_token: "token".to_string(),
        }
    }

    fn api_error() -> ProviderError {
        ProviderError::Api(ApiError {
            status: 400,
            code: 100,
            message: "Invalid call".to_string(),
            user_message: None,
            details: None,
        })
    }

    #[test]
    fn test_handshake_teardown_action() {
        assert_eq!(ProviderHandshake::NotStarted.teardown_action(), Some(TeardownAction::Reject));
        assert_eq!(ProviderHandshake::PreAccepted.teardown_action(), Some(TeardownAction::Terminate));
        assert_eq!(ProviderHandshake::Accepted.teardown_action(), Some(TeardownAction::Terminate));
        assert_eq!(ProviderHandshake::Rejected.teardown_action(), None);
    }

    #[test]
    fn test_ice_server_mapping() {
        let servers = ice_servers(&[IceServerConfig {
            urls: vec!["turn:turn.example.com:3478".to_string()],
            username: Some("user".to_string()),
            credential: Some("secret".to_string()),
        }]);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].username, "user");
        assert_eq!(servers[0].credential, "secret");
    }

    #[tokio::test]
    async fn test_offer_advertises_opus_and_telephone_event() {
        let negotiator = negotiator();
        let leg = negotiator.new_peer_leg("test").await.unwrap();
        let offer = negotiator.create_offer(&leg).await.unwrap();

        assert!(offer.contains("opus/48000/2"));
        assert!(offer.contains("telephone-event/8000"));
        close_peer(&leg.peer, "test").await;
    }

    #[tokio::test]
    async fn test_pre_accept_failure_leaves_handshake_not_started() {
        let negotiator = negotiator();
        let remote = negotiator.new_peer_leg("provider").await.unwrap();
        let offer = negotiator.create_offer(&remote).await.unwrap();

        let mut provider = MockCallingProvider::new();
        provider.expect_pre_accept().times(1).returning(|_, _, _| Err(api_error()));
        provider.expect_accept().never();

        let mut leg = negotiator.new_peer_leg("caller").await.unwrap();
        let (handshake, _) = watch::channel(ProviderHandshake::default());
        let err = negotiator
            .negotiate_inbound(
                &mut leg,
                &offer,
                &provider,
                &account(),
                "wacid.1",
                &handshake,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, NegotiationError::Provider { step: "pre_accept", .. }));
        assert_eq!(handshake.borrow().teardown_action(), Some(TeardownAction::Reject));
        close_peer(&leg.peer, "caller").await;
        close_peer(&remote.peer, "provider").await;
    }

    #[tokio::test]
    async fn test_accept_failure_requires_terminate() {
        let negotiator = negotiator();
        let remote = negotiator.new_peer_leg("provider").await.unwrap();
        let offer = negotiator.create_offer(&remote).await.unwrap();

        let mut provider = MockCallingProvider::new();
        provider.expect_pre_accept().times(1).returning(|_, _, _| Ok(()));
        provider.expect_accept().times(1).returning(|_, _, _| Err(api_error()));

        let mut leg = negotiator.new_peer_leg("caller").await.unwrap();
        let (handshake, _) = watch::channel(ProviderHandshake::default());
        let err = negotiator
            .negotiate_inbound(
                &mut leg,
                &offer,
                &provider,
                &account(),
                "wacid.2",
                &handshake,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, NegotiationError::Provider { step: "accept", .. }));
        assert_eq!(*handshake.borrow(), ProviderHandshake::PreAccepted);
        assert_eq!(handshake.borrow().teardown_action(), Some(TeardownAction::Terminate));
        close_peer(&leg.peer, "caller").await;
        close_peer(&remote.peer, "provider").await;
    }

    #[tokio::test]
    async fn test_outbound_answer_channel_closed() {
        let negotiator = negotiator();
        let mut leg = negotiator.new_peer_leg("outbound").await.unwrap();
        let (tx, rx) = oneshot::channel::<String>();
        drop(tx);

        let err = negotiator
            .await_outbound_answer(&mut leg, rx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::AnswerChannelClosed));
        close_peer(&leg.peer, "outbound").await;
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let negotiator = negotiator();
        let mut leg = negotiator.new_peer_leg("outbound").await.unwrap();
        let (_tx, rx) = oneshot::channel::<String>();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = negotiator.await_outbound_answer(&mut leg, rx, &cancel).await.unwrap_err();
        assert!(matches!(err, NegotiationError::Cancelled));
        close_peer(&leg.peer, "outbound").await;
    }

    #[tokio::test]
    async fn test_rtcp_drain_stops_on_cancel() {
        let negotiator = negotiator();
        let leg = negotiator.new_peer_leg("caller").await.unwrap();
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(leg.rtcp_drain(cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), drain)
            .await
            .expect("drain still running after cancel")
            .unwrap();
        close_peer(&leg.peer, "caller").await;
    }
}
