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
pub struct CreateChatRequest {
    title: String,
}

pub async fn create_chat(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<CreateChatRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let title = required(&payload.title, "title")?;
    let chat = state
        .store
        .create_chat(&state.guard, &identity.user_id, &app_id, &title)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "chat": chat
    })))
}

pub async fn list_chats(
    Extension(identity): Extension<Identity>,
    Path(app_id): Path<String>,
    State(state): State<AppState>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state
        .store
        .list_chats(&state.guard, &identity.user_id, &app_id, &page)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "page": page
    })))
}

pub async fn get_chat(
    Extension(identity): Extension<Identity>,
    Path(chat_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let (chat, messages) = state.store.get_chat(&identity.user_id, &chat_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "chat": chat,
        "messages": messages
    })))
}

pub async fn delete_chat(
    Extension(identity): Extension<Identity>,
    Path(chat_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.delete_chat(&identity.user_id, &chat_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(serde::Deserialize)]
pub struct AddMessageRequest {
    role: String,
    content: Value,
}

pub async fn add_message(
    Extension(identity): Extension<Identity>,
    Path(chat_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<AddMessageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let role = required(&payload.role, "role")?;
    let message = state
        .store
        .add_message(&identity.user_id, &chat_id, &role, &payload.content)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": message
    })))
}

pub async fn list_votes(
    Extension(identity): Extension<Identity>,
    Path(chat_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let votes = state.store.list_votes(&identity.user_id, &chat_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "votes": votes
    })))
}

#[derive(serde::Deserialize)]
pub struct VoteRequest {
    message_id: String,
    is_upvoted: bool,
}

pub async fn vote_message(
    Extension(identity): Extension<Identity>,
    Path(chat_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<VoteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let message_id = required(&payload.message_id, "message_id")?;
    let vote = state
        .store
        .vote_message(&identity.user_id, &chat_id, &message_id, payload.is_upvoted)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "vote": vote
    })))
}
