use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde_json::Value;

use super::required;
use crate::core::store::pagination::PageRequest;
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::Identity;
use crate::interfaces::web::error::ApiResult;

#[derive(serde::Deserialize)]
pub struct CreateDatasetRequest {
    name: String,
    #[serde(default)]
    metadata: Option<Value>,
}

pub async fn create_dataset(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<CreateDatasetRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = required(&payload.name, "name")?;
    let metadata = payload.metadata.unwrap_or_else(|| Value::Object(Default::default()));
    let dataset = state
        .store
        .create_dataset(&state.guard, &identity.user_id, &workspace_id, &name, metadata)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "dataset": dataset
    })))
}

pub async fn list_datasets(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state
        .store
        .list_datasets(&state.guard, &identity.user_id, &workspace_id, &page)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "page": page
    })))
}

pub async fn get_dataset(
    Extension(identity): Extension<Identity>,
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let dataset = state
        .store
        .get_dataset(&state.guard, &identity.user_id, &dataset_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "dataset": dataset
    })))
}

#[derive(serde::Deserialize)]
pub struct RenameDatasetRequest {
    name: String,
}

pub async fn rename_dataset(
    Extension(identity): Extension<Identity>,
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<RenameDatasetRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = required(&payload.name, "name")?;
    let dataset = state
        .store
        .rename_dataset(&state.guard, &identity.user_id, &dataset_id, &name)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "dataset": dataset
    })))
}

pub async fn delete_dataset(
    Extension(identity): Extension<Identity>,
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .delete_dataset(&state.guard, &identity.user_id, &dataset_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(serde::Deserialize)]
pub struct CreateDocumentRequest {
    name: String,
    #[serde(default)]
    metadata: Option<Value>,
}

pub async fn create_document(
    Extension(identity): Extension<Identity>,
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<CreateDocumentRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = required(&payload.name, "name")?;
    let metadata = payload.metadata.unwrap_or_else(|| Value::Object(Default::default()));
    let document = state
        .store
        .create_document(&state.guard, &identity.user_id, &dataset_id, &name, metadata)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "document": document
    })))
}

pub async fn list_documents(
    Extension(identity): Extension<Identity>,
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state
        .store
        .list_documents(&state.guard, &identity.user_id, &dataset_id, &page)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "page": page
    })))
}

pub async fn delete_document(
    Extension(identity): Extension<Identity>,
    Path(document_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .delete_document(&state.guard, &identity.user_id, &document_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(serde::Deserialize)]
pub struct SegmentInput {
    content: String,
    #[serde(default)]
    chunks: Vec<String>,
}

#[derive(serde::Deserialize)]
pub struct ReplaceSegmentsRequest {
    segments: Vec<SegmentInput>,
}

pub async fn replace_segments(
    Extension(identity): Extension<Identity>,
    Path(document_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<ReplaceSegmentsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let segments: Vec<(String, Vec<String>)> = payload
        .segments
        .into_iter()
        .map(|s| (s.content, s.chunks))
        .collect();
    let created = state
        .store
        .replace_segments(&state.guard, &identity.user_id, &document_id, &segments)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "segments": created
    })))
}

pub async fn list_segments(
    Extension(identity): Extension<Identity>,
    Path(document_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let segments = state
        .store
        .list_segments(&state.guard, &identity.user_id, &document_id)
        .await?;
    let mut detailed = Vec::with_capacity(segments.len());
    for segment in segments {
        let chunks = state
            .store
            .list_chunks(&state.guard, &identity.user_id, &segment.id)
            .await?;
        detailed.push(serde_json::json!({
            "segment": segment,
            "chunks": chunks
        }));
    }
    Ok(Json(serde_json::json!({
        "success": true,
        "segments": detailed
    })))
}
