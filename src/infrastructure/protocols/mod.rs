//! Protocol implementations
pub mod webrtc;
