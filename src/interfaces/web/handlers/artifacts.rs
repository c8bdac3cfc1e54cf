use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};

use super::required;
use crate::core::store::error::StoreError;
use crate::core::store::pagination::PageRequest;
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::Identity;
use crate::interfaces::web::error::ApiResult;

#[derive(serde::Deserialize)]
pub struct CreateArtifactRequest {
    title: String,
    kind: String,
    content: String,
}

pub async fn create_artifact(
    Extension(identity): Extension<Identity>,
    Path(chat_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<CreateArtifactRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let title = required(&payload.title, "title")?;
    let kind = required(&payload.kind, "kind")?;
    let artifact = state
        .store
        .create_artifact(&identity.user_id, &chat_id, &title, &kind, &payload.content)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "artifact": artifact
    })))
}

pub async fn list_artifacts(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state.store.list_artifacts(&identity.user_id, &page).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "page": page
    })))
}

pub async fn get_artifact_versions(
    Extension(identity): Extension<Identity>,
    Path(artifact_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let versions = state
        .store
        .get_artifact_versions(&identity.user_id, &artifact_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "versions": versions
    })))
}

#[derive(serde::Deserialize)]
pub struct AddVersionRequest {
    #[serde(default)]
    title: Option<String>,
    content: String,
}

pub async fn add_artifact_version(
    Extension(identity): Extension<Identity>,
    Path(artifact_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<AddVersionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let artifact = state
        .store
        .add_artifact_version(
            &identity.user_id,
            &artifact_id,
            payload.title.as_deref(),
            &payload.content,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "artifact": artifact
    })))
}

#[derive(serde::Deserialize)]
pub struct TrimQuery {
    after: Option<i64>,
}

pub async fn trim_artifact_versions(
    Extension(identity): Extension<Identity>,
    Path(artifact_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<TrimQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let after = query
        .after
        .ok_or_else(|| StoreError::bad_request("after query parameter is required"))?;
    let deleted = state
        .store
        .delete_artifact_versions_after(&identity.user_id, &artifact_id, after)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "deleted": deleted
    })))
}

#[derive(serde::Deserialize)]
pub struct AddSuggestionRequest {
    #[serde(default)]
    artifact_version: Option<i64>,
    original_text: String,
    suggested_text: String,
}

pub async fn add_suggestion(
    Extension(identity): Extension<Identity>,
    Path(artifact_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<AddSuggestionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let suggestion = state
        .store
        .add_suggestion(
            &identity.user_id,
            &artifact_id,
            payload.artifact_version,
            &payload.original_text,
            &payload.suggested_text,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "suggestion": suggestion
    })))
}

pub async fn list_suggestions(
    Extension(identity): Extension<Identity>,
    Path(artifact_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let suggestions = state
        .store
        .list_suggestions(&identity.user_id, &artifact_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "suggestions": suggestions
    })))
}

pub async fn resolve_suggestion(
    Extension(identity): Extension<Identity>,
    Path(suggestion_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let suggestion = state
        .store
        .resolve_suggestion(&identity.user_id, &suggestion_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "suggestion": suggestion
    })))
}
