//! Hand-off point to the text conversation engine

use crate::domain::shared::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Context handed over when an IVR option jumps to a text flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowHandoff {
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub account_name: String,
    pub phone_number: String,
    pub call_id: String,
    /// Flow named by the IVR option
    pub flow: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlowEngine: Send + Sync {
    async fn start_flow(&self, handoff: FlowHandoff) -> Result<()>;
}

/// Flow engine used when no text engine is wired in; records the hand-off only
#[derive(Debug, Default)]
pub struct LoggingFlowEngine;

#[async_trait]
impl FlowEngine for LoggingFlowEngine {
    async fn start_flow(&self, handoff: FlowHandoff) -> Result<()> {
        info!(
            "Flow hand-off for contact {} from call {} (flow: {:?})",
            handoff.contact_id, handoff.call_id, handoff.flow
        );
        Ok(())
    }
}
