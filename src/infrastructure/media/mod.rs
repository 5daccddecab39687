//! Media processing implementations

pub mod bridge;
pub mod player;
pub mod track;

pub use bridge::{AudioBridge, BridgeExit, BridgeStats, LegExit};
pub use player::{AudioPlayer, PlaybackOutcome, OPUS_PAYLOAD_TYPE};
pub use track::{loopback_track, LoopbackReader, LoopbackWriter, MediaError, RtpReader, RtpWriter};
