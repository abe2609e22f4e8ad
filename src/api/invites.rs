use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, CodeRequest, MessageResponse};
use crate::db::Invitation;
use crate::services::{ClaimResult, CreateInvitationRequest, CreatedInvitation, InvitationDetails};

#[derive(Deserialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub plex_token: String,
}

/// POST /invites/create
pub async fn create_invite(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateInvitationRequest>,
) -> Result<Json<ApiResponse<CreatedInvitation>>, ApiError> {
    let created = state.shared.invite_service.create_invitation(payload).await?;
    Ok(Json(ApiResponse::success(created)))
}

/// GET /invites/list
pub async fn list_invites(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Invitation>>>, ApiError> {
    let invitations = state.shared.invite_service.list_invitations().await?;
    Ok(Json(ApiResponse::success(invitations)))
}

/// POST /invites/delete
pub async fn delete_invite(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CodeRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if payload.code.trim().is_empty() {
        return Err(ApiError::validation("Código do convite não fornecido."));
    }
    state
        .shared
        .invite_service
        .delete_invitation(payload.code.trim())
        .await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Convite excluído com sucesso.",
    ))))
}

/// GET /invites/details/{code}
pub async fn get_invite_details(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<InvitationDetails>>, ApiError> {
    let invitation = state
        .shared
        .invite_service
        .get_invitation_by_code(&code)
        .await?;
    Ok(Json(ApiResponse::success(InvitationDetails::from(
        &invitation,
    ))))
}

/// POST /invites/claim
pub async fn claim_invite(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ClaimRequest>,
) -> Result<Json<ApiResponse<ClaimResult>>, ApiError> {
    if payload.plex_token.trim().is_empty() {
        return Err(ApiError::validation("Token do Plex não fornecido."));
    }
    if payload.code.trim().is_empty() {
        return Err(ApiError::validation("Código do convite não fornecido."));
    }

    let result = state
        .shared
        .invite_service
        .claim_invitation(payload.code.trim(), payload.plex_token.trim())
        .await?;
    Ok(Json(ApiResponse::success(result)))
}
