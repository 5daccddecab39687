//! callwire - voice calling core for a WhatsApp Business contact center
//!
//! Bridges WhatsApp Cloud API calls into WebRTC peer connections, runs
//! DTMF-driven IVR menus, queues callers for agents and relays audio
//! between the caller and the agent's browser.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
