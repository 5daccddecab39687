//! Agent transfer queue handlers

use super::context::AgentContext;
use super::dto::{AcceptTransferBody, ApiResponse, PickTransferBody, ReturnedTransfers, SdpAnswer};
use super::error::ApiResult;
use super::state::AppState;
use crate::application::calling::CallingError;
use crate::domain::agent_transfer::AgentTransfer;
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

pub async fn list_transfers(State(state): State<AppState>, ctx: AgentContext) -> ApiResult<Vec<AgentTransfer>> {
    let transfers = state
        .manager
        .transfers()
        .list_active(ctx.organization_id)
        .await
        .map_err(CallingError::from)?;
    Ok(Json(ApiResponse::success(transfers)))
}

/// Take the oldest waiting transfer visible to the agent. `data` is null
/// when the queue is empty.
pub async fn pick_next(
    State(state): State<AppState>,
    ctx: AgentContext,
    body: Option<Json<PickTransferBody>>,
) -> ApiResult<Option<AgentTransfer>> {
    let team_id = body.and_then(|Json(b)| b.team_id);
    let transfer = state
        .manager
        .pick_next_transfer(ctx.organization_id, ctx.agent_id, team_id)
        .await?;
    Ok(Json(ApiResponse::success(transfer)))
}

/// Release every transfer the agent holds
pub async fn return_to_queue(State(state): State<AppState>, ctx: AgentContext) -> ApiResult<ReturnedTransfers> {
    let returned = state
        .manager
        .return_transfers(ctx.organization_id, ctx.agent_id)
        .await?;
    Ok(Json(ApiResponse::success(ReturnedTransfers { returned })))
}

pub async fn accept_transfer(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(transfer_id): Path<Uuid>,
    Json(body): Json<AcceptTransferBody>,
) -> ApiResult<SdpAnswer> {
    let sdp_answer = state
        .manager
        .accept_transfer(ctx.organization_id, transfer_id, ctx.agent_id, &body.sdp_offer)
        .await?;
    Ok(Json(ApiResponse::success(SdpAnswer { sdp_answer })))
}

pub async fn end_transfer(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(transfer_id): Path<Uuid>,
) -> ApiResult<AgentTransfer> {
    let transfer = state
        .manager
        .end_transfer(ctx.organization_id, transfer_id, ctx.agent_id)
        .await?;
    Ok(Json(ApiResponse::success(transfer)))
}

/// Send the caller back to the IVR
pub async fn resume_transfer(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(transfer_id): Path<Uuid>,
) -> ApiResult<AgentTransfer> {
    let transfer = state
        .manager
        .resume_transfer(ctx.organization_id, transfer_id, Some(ctx.agent_id))
        .await?;
    Ok(Json(ApiResponse::success(transfer)))
}
