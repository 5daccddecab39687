//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Entities: call logs, transfer queue entries, call permissions, IVR flows
//! - Value Objects: call status, direction, transfer sub-state
//! - Repository Interfaces: Ports for persistence and directories

pub mod account;
pub mod agent_transfer;
pub mod call;
pub mod call_permission;
pub mod ivr_flow;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
