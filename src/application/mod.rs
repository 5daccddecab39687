//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects and infrastructure to fulfill
//! use cases. It's responsible for:
//! - Live call session lifecycle
//! - Driving negotiation, IVR and transfers for each call
//! - Writing call logs and publishing notifications

pub mod calling;
