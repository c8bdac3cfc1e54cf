use axum::{
    Extension, Json,
    extract::{Path, State},
};

use super::required;
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::Identity;
use crate::interfaces::web::error::ApiResult;

#[derive(serde::Deserialize)]
pub struct CreateKeyRequest {
    name: String,
}

pub async fn create_key(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Json(payload): Json<CreateKeyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = required(&payload.name, "name")?;
    let (raw_key, record) = state.store.create_api_key(&identity.user_id, &name).await?;
    // The raw key appears in this response only; afterwards just the hash exists.
    Ok(Json(serde_json::json!({
        "success": true,
        "key": raw_key,
        "record": record
    })))
}

pub async fn list_keys(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let keys = state.store.list_api_keys(&identity.user_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "keys": keys
    })))
}

pub async fn delete_key(
    Extension(identity): Extension<Identity>,
    Path(key_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .delete_api_key(&identity.user_id, &key_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
