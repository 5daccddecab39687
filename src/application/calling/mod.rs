//! Live call orchestration
//!
//! Owns the registry of live sessions and every decision about a call's
//! lifecycle: provider reject/terminate calls, call log writes, transfers
//! and IVR hand-offs.

pub mod error;
pub mod flow_engine;
pub mod ivr;
pub mod manager;
pub mod outgoing;
pub mod registry;
pub mod session;
pub mod transfer;

pub use error::{CallingError, CallingResult};
pub use flow_engine::{FlowEngine, FlowHandoff, LoggingFlowEngine};
pub use ivr::{run_ivr, FilePromptPlayer, IvrExit, PromptPlayer};
pub use manager::{CallManager, CallOutcome, CallingPorts, IncomingCall};
pub use outgoing::{OutgoingCall, OutgoingCallRequest};
pub use registry::CallSessionRegistry;
pub use session::{CallSession, MediaLeg, NewCallSession, SessionState};
pub use transfer::{BridgePlan, TransferOrchestrator, TransferRequest};
