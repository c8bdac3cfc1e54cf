use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde_json::Value;

use super::required;
use crate::core::store::pagination::PageRequest;
use crate::core::store::{EntityFields, EntityPatch, VersionSelector};
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::Identity;
use crate::interfaces::web::error::ApiResult;

#[derive(serde::Deserialize)]
pub struct CreateAppRequest {
    kind: String,
    name: String,
    #[serde(default)]
    metadata: Option<Value>,
}

pub async fn create_app(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<CreateAppRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let fields = EntityFields {
        kind: required(&payload.kind, "kind")?,
        name: required(&payload.name, "name")?,
        metadata: payload.metadata.unwrap_or_else(|| Value::Object(Default::default())),
    };
    let (app, draft) = state
        .store
        .create_app(&state.guard, &identity.user_id, &workspace_id, fields)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "app": app,
        "draft": draft
    })))
}

pub async fn list_apps(
    Extension(identity): Extension<Identity>,
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state
        .store
        .list_apps(&state.guard, &identity.user_id, &workspace_id, &page)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "page": page
    })))
}

pub async fn get_app(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let app = state
        .store
        .get_app(&state.guard, &identity.user_id, &app_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "app": app
    })))
}

#[derive(serde::Deserialize)]
pub struct UpdateEntityRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl UpdateEntityRequest {
    pub fn into_patch(self) -> EntityPatch {
        EntityPatch {
            name: self.name,
            metadata: self.metadata,
        }
    }
}

pub async fn update_app(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateEntityRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (app, draft) = state
        .store
        .update_app(&state.guard, &identity.user_id, &app_id, payload.into_patch())
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "app": app,
        "draft": draft
    })))
}

pub async fn publish_app(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let (app, version) = state
        .store
        .publish_app(&state.guard, &identity.user_id, &app_id)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "app": app,
        "version": version
    })))
}

pub async fn delete_app(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .delete_app(&state.guard, &identity.user_id, &app_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn get_app_version(
    Extension(identity): Extension<Identity>,
    Path((app_id, selector)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let selector = VersionSelector::parse(&selector)?;
    let version = state
        .store
        .get_app_version(&state.guard, &identity.user_id, &app_id, &selector)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "version": version
    })))
}

#[derive(serde::Deserialize)]
pub struct SetTagsRequest {
    tags: Vec<String>,
}

pub async fn set_tags(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<SetTagsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let tags = state
        .store
        .set_app_tags(&state.guard, &identity.user_id, &app_id, &payload.tags)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "tags": tags
    })))
}

#[derive(serde::Deserialize)]
pub struct SetCategoriesRequest {
    categories: Vec<String>,
}

pub async fn set_categories(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<SetCategoriesRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let categories = state
        .store
        .set_app_categories(&state.guard, &identity.user_id, &app_id, &payload.categories)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "categories": categories
    })))
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let categories = state.store.list_categories_with_previews().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "categories": categories
    })))
}
