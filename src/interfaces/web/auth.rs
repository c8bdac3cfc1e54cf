use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

/// Resolved caller identity, attached as a request extension for handlers.
#[derive(Debug, Clone)]
pub(crate) struct Identity {
    pub(crate) user_id: String,
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "success": false,
            "code": "UNAUTHORIZED",
            "error": message
        })),
    )
        .into_response()
}

/// Resolve the caller before any handler runs. Two accepted forms:
///
/// 1. `Authorization: Bearer tvk_...` — an API key minted via the key
///    endpoints; the key hash maps back to its owning user.
/// 2. `x-tavern-user-id` — identity already resolved by a trusted gateway
///    sitting in front of this service.
///
/// Anything else is rejected with 401 before touching the store.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let bearer = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    if let Some(raw_key) = bearer {
        if !raw_key.starts_with("tvk_") {
            return unauthorized("malformed API key");
        }
        return match state.store.resolve_api_key(&raw_key).await {
            Ok(Some(user_id)) => {
                req.extensions_mut().insert(Identity { user_id });
                next.run(req).await
            }
            Ok(None) => unauthorized("invalid API key"),
            Err(e) => {
                tracing::error!("API key lookup failed: {e}");
                unauthorized("invalid API key")
            }
        };
    }

    let header_user = req
        .headers()
        .get("x-tavern-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    if let Some(user_id) = header_user {
        req.extensions_mut().insert(Identity { user_id });
        return next.run(req).await;
    }

    unauthorized("missing credentials: use Bearer <api key> or x-tavern-user-id")
}
