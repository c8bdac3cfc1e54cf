use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde_json::Value;

use super::apps::UpdateEntityRequest;
use super::required;
use crate::core::store::pagination::PageRequest;
use crate::core::store::{EntityFields, VersionSelector};
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::Identity;
use crate::interfaces::web::error::ApiResult;

#[derive(serde::Deserialize)]
pub struct CreateAgentRequest {
    kind: String,
    name: String,
    #[serde(default)]
    metadata: Option<Value>,
}

pub async fn create_agent(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<CreateAgentRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let fields = EntityFields {
        kind: required(&payload.kind, "kind")?,
        name: required(&payload.name, "name")?,
        metadata: payload.metadata.unwrap_or_else(|| Value::Object(Default::default())),
    };
    let (agent, draft) = state
        .store
        .create_agent(&state.guard, &identity.user_id, &app_id, fields)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "agent": agent,
        "draft": draft
    })))
}

pub async fn list_agents(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state
        .store
        .list_agents(&state.guard, &identity.user_id, &app_id, &page)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "page": page
    })))
}

pub async fn get_agent(
    Extension(identity): Extension<Identity>,
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let agent = state
        .store
        .get_agent(&state.guard, &identity.user_id, &agent_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "agent": agent
    })))
}

pub async fn update_agent(
    Extension(identity): Extension<Identity>,
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateEntityRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (agent, draft) = state
        .store
        .update_agent(&state.guard, &identity.user_id, &agent_id, payload.into_patch())
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "agent": agent,
        "draft": draft
    })))
}

pub async fn publish_agent(
    Extension(identity): Extension<Identity>,
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let (agent, version) = state
        .store
        .publish_agent(&state.guard, &identity.user_id, &agent_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "agent": agent,
        "version": version
    })))
}

pub async fn delete_agent(
    Extension(identity): Extension<Identity>,
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .delete_agent(&state.guard, &identity.user_id, &agent_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn get_agent_version(
    Extension(identity): Extension<Identity>,
    Path((agent_id, selector)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let selector = VersionSelector::parse(&selector)?;
    let version = state
        .store
        .get_agent_version(&state.guard, &identity.user_id, &agent_id, &selector)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "version": version
    })))
}
