use axum::{
    Extension, Json,
    extract::{Path, State},
};

use super::required;
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::Identity;
use crate::interfaces::web::error::ApiResult;

pub async fn list_workspaces(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspaces = state.store.list_workspaces(&identity.user_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "workspaces": workspaces
    })))
}

#[derive(serde::Deserialize)]
pub struct CreateWorkspaceRequest {
    name: String,
}

pub async fn create_workspace(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkspaceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = required(&payload.name, "name")?;
    let workspace = state
        .store
        .create_workspace(&state.guard, &identity.user_id, &name)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "workspace": workspace
    })))
}

pub async fn get_workspace(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspace = state
        .store
        .get_workspace(&state.guard, &identity.user_id, &workspace_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "workspace": workspace
    })))
}

#[derive(serde::Deserialize)]
pub struct RenameWorkspaceRequest {
    name: String,
}

pub async fn rename_workspace(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<RenameWorkspaceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = required(&payload.name, "name")?;
    let workspace = state
        .store
        .rename_workspace(&state.guard, &identity.user_id, &workspace_id, &name)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "workspace": workspace
    })))
}

pub async fn delete_workspace(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .delete_workspace(&state.guard, &identity.user_id, &workspace_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn list_members(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let members = state
        .store
        .list_members(&state.guard, &identity.user_id, &workspace_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "members": members
    })))
}

#[derive(serde::Deserialize)]
pub struct AddMemberRequest {
    user_id: String,
}

pub async fn add_member(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<AddMemberRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = required(&payload.user_id, "user_id")?;
    let member = state
        .store
        .add_member(&state.guard, &identity.user_id, &workspace_id, &user_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "member": member
    })))
}

pub async fn remove_member(
    Extension(identity): Extension<Identity>,
    Path((workspace_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .remove_member(&state.guard, &identity.user_id, &workspace_id, &user_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(serde::Deserialize)]
pub struct TransferOwnerRequest {
    user_id: String,
}

pub async fn transfer_owner(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<TransferOwnerRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = required(&payload.user_id, "user_id")?;
    state
        .store
        .transfer_owner(&state.guard, &identity.user_id, &workspace_id, &user_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
