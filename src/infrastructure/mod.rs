//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - IVR menu trees, interpreter and DTMF decoding
//! - Media: RTP track seams, audio player, audio bridge
//! - WebRTC negotiation with the calling provider
//! - The calling provider HTTP client
//! - Real-time event fan-out
//! - Repository implementations (in-memory and PostgreSQL)

pub mod ivr;
pub mod media;
pub mod messaging;
pub mod persistence;
pub mod protocols;
pub mod whatsapp;
