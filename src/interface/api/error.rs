//! HTTP mapping of orchestration errors

use super::dto::ApiResponse;
use crate::application::calling::CallingError;
use crate::domain::agent_transfer::TransferError;
use crate::domain::shared::DomainError;
use crate::infrastructure::protocols::webrtc::NegotiationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

/// Handler error, rendered as an `ApiResponse` with a matching status
#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<CallingError> for HttpError {
    fn from(err: CallingError) -> Self {
        let status = calling_status(&err);
        if status.is_server_error() {
            error!("API: {}", err);
        } else {
            warn!("API: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.message))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, HttpError>;

fn calling_status(err: &CallingError) -> StatusCode {
    match err {
        CallingError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
        CallingError::SessionNotFound(_)
        | CallingError::CallLogNotFound(_)
        | CallingError::AccountNotFound(_)
        | CallingError::ContactNotFound(_) => StatusCode::NOT_FOUND,
        CallingError::SessionExists(_) => StatusCode::CONFLICT,
        CallingError::PermissionRequired(_) | CallingError::NotCallOwner(_) => StatusCode::FORBIDDEN,
        CallingError::Negotiation(e) => negotiation_status(e),
        CallingError::Provider(_) => StatusCode::BAD_GATEWAY,
        CallingError::Transfer(e) => transfer_status(e),
        CallingError::Domain(e) => domain_status(e),
    }
}

fn negotiation_status(err: &NegotiationError) -> StatusCode {
    match err {
        NegotiationError::Sdp(_) => StatusCode::BAD_REQUEST,
        NegotiationError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        NegotiationError::Provider { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn transfer_status(err: &TransferError) -> StatusCode {
    match err {
        TransferError::ActiveTransferExists { .. }
        | TransferError::AgentUnavailable { .. }
        | TransferError::NotActive(_)
        | TransferError::CallNotWaiting(_) => StatusCode::CONFLICT,
        TransferError::PickupDisabled | TransferError::NotAssigned { .. } => StatusCode::FORBIDDEN,
        TransferError::NotFound(_) => StatusCode::NOT_FOUND,
        TransferError::Repository(e) => domain_status(e),
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::AlreadyExists(_) | DomainError::Conflict(_) | DomainError::InvalidStateTransition(_) => {
            StatusCode::CONFLICT
        }
        DomainError::ValidationError(_) | DomainError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
        DomainError::Unauthorized(_) => StatusCode::FORBIDDEN,
        DomainError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::Persistence(_) | DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_queue_outcomes_map_to_client_errors() {
        let conflict: HttpError = CallingError::Transfer(TransferError::ActiveTransferExists {
            contact_id: Uuid::new_v4(),
        })
        .into();
        assert_eq!(conflict.status, StatusCode::CONFLICT);

        let disabled: HttpError = CallingError::Transfer(TransferError::PickupDisabled).into();
        assert_eq!(disabled.status, StatusCode::FORBIDDEN);

        let missing: HttpError =
            CallingError::Transfer(TransferError::Repository(DomainError::NotFound("x".into()))).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_permission_required_is_forbidden() {
        let err: HttpError = CallingError::PermissionRequired(Uuid::new_v4()).into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert!(err.message.contains("call permission"));
    }
}
