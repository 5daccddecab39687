//! Outgoing call and call permission handlers

use super::context::AgentContext;
use super::dto::{ApiResponse, OutgoingCallBody, OutgoingCallResponse, PermissionRequestBody};
use super::error::ApiResult;
use super::state::AppState;
use crate::application::calling::OutgoingCallRequest;
use crate::domain::call_permission::CallPermission;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;
use uuid::Uuid;

/// Place a call from an agent's browser to a contact
pub async fn make_outgoing_call(
    State(state): State<AppState>,
    ctx: AgentContext,
    Json(body): Json<OutgoingCallBody>,
) -> ApiResult<OutgoingCallResponse> {
    info!("API: agent {} calls contact {}", ctx.agent_id, body.contact_id);
    let call = state
        .manager
        .make_outgoing_call(OutgoingCallRequest {
            organization_id: ctx.organization_id,
            agent_id: ctx.agent_id,
            contact_id: body.contact_id,
            account_name: body.account_name,
            sdp_offer: body.sdp_offer,
        })
        .await?;

    Ok(Json(ApiResponse::success(OutgoingCallResponse {
        call_log_id: call.call_log_id,
        call_id: call.call_id,
        sdp_answer: call.sdp_answer,
    })))
}

pub async fn hangup_outgoing_call(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(call_log_id): Path<Uuid>,
) -> ApiResult<()> {
    state
        .manager
        .hangup_outgoing_call(ctx.organization_id, call_log_id, ctx.agent_id)
        .await?;
    Ok(Json(ApiResponse::success(())))
}

/// Ask a contact for consent to be called
pub async fn send_permission_request(
    State(state): State<AppState>,
    ctx: AgentContext,
    Json(body): Json<PermissionRequestBody>,
) -> ApiResult<CallPermission> {
    let permission = state
        .manager
        .send_permission_request(
            ctx.organization_id,
            body.contact_id,
            &body.account_name,
            body.body.as_deref(),
        )
        .await?;
    Ok(Json(ApiResponse::success(permission)))
}

pub async fn get_permission(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(contact_id): Path<Uuid>,
) -> ApiResult<Option<CallPermission>> {
    let permission = state
        .manager
        .latest_permission(ctx.organization_id, contact_id)
        .await?;
    Ok(Json(ApiResponse::success(permission)))
}
