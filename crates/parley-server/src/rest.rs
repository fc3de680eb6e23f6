use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use parley_core::errors::HubError;
use parley_core::ids::{SessionId, UserId};
use parley_hub::{Hub, JoinOptions};

const MAX_LISTED_SESSIONS: usize = 10;

/// HTTP mirror of the session registry, for clients that manage sessions
/// outside a live socket. Identity is asserted by the upstream gateway;
/// this surface does not verify tokens.
pub fn router() -> Router<Arc<Hub>> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/end", post(end_session))
        .route("/users/{user_id}/sessions", get(user_sessions))
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    user_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    duration_minutes: Option<u32>,
    #[serde(default)]
    is_multi_user: bool,
}

#[derive(Debug, Deserialize)]
struct EndSessionRequest {
    user_id: String,
}

async fn create_session(
    State(hub): State<Arc<Hub>>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let session_id = match req.session_id {
        Some(raw) => {
            let id = SessionId::from_raw(raw);
            if hub.sessions().contains(&id) {
                return error_response(StatusCode::CONFLICT, "session already exists");
            }
            id
        }
        None => SessionId::new(),
    };

    let effects = hub.sessions().join_or_create(
        session_id,
        UserId::from_raw(req.user_id),
        JoinOptions {
            name: req.name,
            is_host: true,
            duration_minutes: req.duration_minutes,
            is_multi_user: req.is_multi_user,
        },
    );
    (StatusCode::CREATED, Json(effects.snapshot)).into_response()
}

async fn get_session(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Response {
    match hub.sessions().snapshot(&SessionId::from_raw(id)) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "session not found"),
    }
}

async fn end_session(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    Json(req): Json<EndSessionRequest>,
) -> Response {
    let session_id = SessionId::from_raw(id);
    match hub.end_session(&session_id, &UserId::from_raw(req.user_id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => hub_error_response(e),
    }
}

async fn user_sessions(State(hub): State<Arc<Hub>>, Path(user_id): Path<String>) -> Response {
    let mut sessions = hub.sessions().sessions_for_user(&UserId::from_raw(user_id));
    // RFC 3339 timestamps sort lexicographically; newest first.
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sessions.truncate(MAX_LISTED_SESSIONS);
    Json(sessions).into_response()
}

fn hub_error_response(e: HubError) -> Response {
    let status = match &e {
        HubError::Auth(_) => StatusCode::UNAUTHORIZED,
        HubError::Authorization(_) => StatusCode::FORBIDDEN,
        HubError::SessionState(_) => StatusCode::NOT_FOUND,
        HubError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
        HubError::Generation(_) | HubError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &e.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use parley_ai::MockResponder;
    use parley_core::auth::StaticVerifier;
    use parley_hub::HubConfig;

    fn test_app() -> (Arc<Hub>, Router) {
        let hub = Arc::new(Hub::new(
            HubConfig::default(),
            Arc::new(MockResponder::new(vec![])),
            Arc::new(StaticVerifier::new()),
            None,
        ));
        let app = router().with_state(Arc::clone(&hub));
        (hub, app)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_session() {
        let (_hub, app) = test_app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/sessions",
                serde_json::json!({"user_id": "u1", "name": "Alice", "is_multi_user": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let id = created["session_id"].as_str().unwrap().to_string();
        assert_eq!(created["is_multi_user"], true);
        assert_eq!(created["host_user_id"], "u1");

        let response = app
            .oneshot(Request::get(format!("/sessions/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched = body_json(response).await;
        assert_eq!(fetched["session_id"], id.as_str());
    }

    #[tokio::test]
    async fn missing_session_is_404() {
        let (_hub, app) = test_app();
        let response = app
            .oneshot(Request::get("/sessions/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_create_is_409() {
        let (_hub, app) = test_app();
        let body = serde_json::json!({"user_id": "u1", "session_id": "dup"});
        let first = app.clone().oneshot(post_json("/sessions", body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app.oneshot(post_json("/sessions", body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn end_requires_host() {
        let (hub, app) = test_app();
        app.clone()
            .oneshot(post_json(
                "/sessions",
                serde_json::json!({"user_id": "u1", "session_id": "s1"}),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json("/sessions/s1/end", serde_json::json!({"user_id": "u2"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(post_json("/sessions/s1/end", serde_json::json!({"user_id": "u1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!hub.sessions().contains(&SessionId::from_raw("s1")));
    }

    #[tokio::test]
    async fn user_sessions_capped_and_newest_first() {
        let (hub, app) = test_app();
        for i in 0..12 {
            hub.sessions().join_or_create(
                SessionId::from_raw(format!("s{i}")),
                UserId::from_raw("u1"),
                JoinOptions {
                    is_host: true,
                    ..JoinOptions::default()
                },
            );
        }

        let response = app
            .oneshot(Request::get("/users/u1/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().unwrap().len(), MAX_LISTED_SESSIONS);
    }
}
