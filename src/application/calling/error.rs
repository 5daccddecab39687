//! Orchestration errors

use crate::domain::agent_transfer::TransferError;
use crate::domain::shared::DomainError;
use crate::infrastructure::protocols::webrtc::NegotiationError;
use crate::infrastructure::whatsapp::ProviderError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CallingError {
    #[error("calling is disabled")]
    Disabled,

    #[error("call session not found: {0}")]
    SessionNotFound(String),

    #[error("call session already exists: {0}")]
    SessionExists(String),

    #[error("call log not found: {0}")]
    CallLogNotFound(Uuid),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("contact not found: {0}")]
    ContactNotFound(Uuid),

    #[error("contact {0} has not granted call permission")]
    PermissionRequired(Uuid),

    #[error("call {0} is owned by another agent")]
    NotCallOwner(Uuid),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type CallingResult<T> = Result<T, CallingError>;
