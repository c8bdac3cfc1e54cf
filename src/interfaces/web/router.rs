use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{agents, apps, artifacts, chats, datasets, keys, workspaces};

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/workspaces",
            get(workspaces::list_workspaces).post(workspaces::create_workspace),
        )
        .route(
            "/api/workspaces/{id}",
            get(workspaces::get_workspace)
                .patch(workspaces::rename_workspace)
                .delete(workspaces::delete_workspace),
        )
        .route(
            "/api/workspaces/{id}/members",
            get(workspaces::list_members).post(workspaces::add_member),
        )
        .route(
            "/api/workspaces/{id}/members/{user_id}",
            axum::routing::delete(workspaces::remove_member),
        )
        .route(
            "/api/workspaces/{id}/transfer-owner",
            post(workspaces::transfer_owner),
        )
        .route(
            "/api/workspaces/{id}/apps",
            get(apps::list_apps).post(apps::create_app),
        )
        .route(
            "/api/workspaces/{id}/datasets",
            get(datasets::list_datasets).post(datasets::create_dataset),
        )
        .route(
            "/api/apps/{id}",
            get(apps::get_app)
                .patch(apps::update_app)
                .delete(apps::delete_app),
        )
        .route("/api/apps/{id}/publish", post(apps::publish_app))
        .route(
            "/api/apps/{id}/versions/{selector}",
            get(apps::get_app_version),
        )
        .route("/api/apps/{id}/tags", put(apps::set_tags))
        .route("/api/apps/{id}/categories", put(apps::set_categories))
        .route(
            "/api/apps/{id}/agents",
            get(agents::list_agents).post(agents::create_agent),
        )
        .route(
            "/api/apps/{id}/chats",
            get(chats::list_chats).post(chats::create_chat),
        )
        .route("/api/categories", get(apps::list_categories))
        .route(
            "/api/agents/{id}",
            get(agents::get_agent)
                .patch(agents::update_agent)
                .delete(agents::delete_agent),
        )
        .route("/api/agents/{id}/publish", post(agents::publish_agent))
        .route(
            "/api/agents/{id}/versions/{selector}",
            get(agents::get_agent_version),
        )
        .route(
            "/api/datasets/{id}",
            get(datasets::get_dataset)
                .patch(datasets::rename_dataset)
                .delete(datasets::delete_dataset),
        )
        .route(
            "/api/datasets/{id}/documents",
            get(datasets::list_documents).post(datasets::create_document),
        )
        .route(
            "/api/documents/{id}",
            axum::routing::delete(datasets::delete_document),
        )
        .route(
            "/api/documents/{id}/segments",
            get(datasets::list_segments).post(datasets::replace_segments),
        )
        .route(
            "/api/chats/{id}",
            get(chats::get_chat).delete(chats::delete_chat),
        )
        .route("/api/chats/{id}/messages", post(chats::add_message))
        .route(
            "/api/chats/{id}/votes",
            get(chats::list_votes).put(chats::vote_message),
        )
        .route("/api/chats/{id}/artifacts", post(artifacts::create_artifact))
        .route("/api/artifacts", get(artifacts::list_artifacts))
        .route("/api/artifacts/{id}", get(artifacts::get_artifact_versions))
        .route(
            "/api/artifacts/{id}/versions",
            post(artifacts::add_artifact_version).delete(artifacts::trim_artifact_versions),
        )
        .route(
            "/api/artifacts/{id}/suggestions",
            get(artifacts::list_suggestions).post(artifacts::add_suggestion),
        )
        .route(
            "/api/suggestions/{id}/resolve",
            post(artifacts::resolve_suggestion),
        )
        .route("/api/keys", get(keys::list_keys).post(keys::create_key))
        .route("/api/keys/{id}", axum::routing::delete(keys::delete_key))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors())
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaLimits;
    use crate::core::guard::Guard;
    use crate::core::store::test_store;
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use tower::util::ServiceExt;

    async fn test_router() -> Router {
        let state = AppState {
            store: test_store().await,
            guard: Guard::new(QuotaLimits::default()),
        };
        build_api_router(state)
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-tavern-user-id", user);
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        builder.body(body).expect("request should build")
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(req)
            .await
            .expect("oneshot should succeed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should collect");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body should be JSON")
        };
        (status, value)
    }

    #[tokio::test]
    async fn unauthenticated_requests_get_401_envelope() {
        let router = test_router().await;
        let (status, body) = send(&router, request("GET", "/api/workspaces", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn workspace_create_and_fetch_roundtrip() {
        let router = test_router().await;
        let (status, body) = send(
            &router,
            request(
                "POST",
                "/api/workspaces",
                Some("alice"),
                Some(json!({"name": "Team"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let id = body["workspace"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &router,
            request("GET", &format!("/api/workspaces/{id}"), Some("alice"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workspace"]["name"], "Team");
    }

    #[tokio::test]
    async fn missing_resource_maps_to_404() {
        let router = test_router().await;
        let (status, body) = send(
            &router,
            request("GET", "/api/apps/nope", Some("alice"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn blank_name_maps_to_400() {
        let router = test_router().await;
        let (status, body) = send(
            &router,
            request(
                "POST",
                "/api/workspaces",
                Some("alice"),
                Some(json!({"name": "   "})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn non_member_access_maps_to_403() {
        let router = test_router().await;
        let (_, body) = send(
            &router,
            request(
                "POST",
                "/api/workspaces",
                Some("alice"),
                Some(json!({"name": "Team"})),
            ),
        )
        .await;
        let id = body["workspace"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &router,
            request(
                "GET",
                &format!("/api/workspaces/{id}"),
                Some("mallory"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn publish_flow_over_http() {
        let router = test_router().await;
        let (_, body) = send(
            &router,
            request(
                "POST",
                "/api/workspaces",
                Some("alice"),
                Some(json!({"name": "Team"})),
            ),
        )
        .await;
        let ws = body["workspace"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &router,
            request(
                "POST",
                &format!("/api/workspaces/{ws}/apps"),
                Some("alice"),
                Some(json!({"kind": "single-agent", "name": "Helper"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let app = body["app"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &router,
            request(
                "POST",
                &format!("/api/apps/{app}/publish"),
                Some("alice"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let version = body["version"].as_i64().unwrap();
        assert!(version > 0);

        let (status, body) = send(
            &router,
            request(
                "GET",
                &format!("/api/apps/{app}/versions/latest"),
                Some("alice"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"]["version"].as_i64().unwrap(), version);
    }

    #[tokio::test]
    async fn contradictory_cursors_map_to_400() {
        let router = test_router().await;
        let (_, body) = send(
            &router,
            request(
                "POST",
                "/api/workspaces",
                Some("alice"),
                Some(json!({"name": "Team"})),
            ),
        )
        .await;
        let ws = body["workspace"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &router,
            request(
                "GET",
                &format!("/api/workspaces/{ws}/apps?after=a&before=b"),
                Some("alice"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn api_key_lifecycle_over_http() {
        let router = test_router().await;
        let (status, body) = send(
            &router,
            request(
                "POST",
                "/api/keys",
                Some("alice"),
                Some(json!({"name": "laptop"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let raw = body["key"].as_str().unwrap().to_string();
        assert!(raw.starts_with("tvk_"));

        // The minted key authenticates in place of the gateway header.
        let req = Request::builder()
            .uri("/api/workspaces")
            .header("authorization", format!("Bearer {raw}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn security_headers_are_set() {
        let router = test_router().await;
        let response = router
            .oneshot(request("GET", "/api/categories", Some("alice"), None))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }
}
