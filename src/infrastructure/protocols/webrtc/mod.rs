//! WebRTC protocol implementation
pub mod negotiator;

pub use negotiator::{
    close_peer, NegotiationError, PeerLeg, ProviderHandshake, RemoteTrack, RemoteTrackKind,
    TeardownAction, WebRtcNegotiator, TELEPHONE_EVENT_PAYLOAD_TYPE,
};
