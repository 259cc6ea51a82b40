//! HTTP API tests: requests go through the router in-process.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use tether::error::TetherResult;
use tether::llm::ModelReply;
use tether::server::router;
use tether::store::{SessionStore, SqliteSessionStore};

use common::{orchestrator, temp_store, text, FakeIndex, ScriptedModel};

async fn app(replies: Vec<TetherResult<ModelReply>>) -> (TempDir, Arc<SqliteSessionStore>, Router) {
    let (tmp, store) = temp_store().await;
    let orch = orchestrator(
        store.clone(),
        FakeIndex::with_passages(&["Body doubling helps."]),
        ScriptedModel::new(replies),
    );
    (tmp, store, router(orch))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn info_and_health() {
    let (_tmp, _store, app) = app(vec![]).await;

    let (status, body) = send(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Tether API");

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["index_loaded"], true);
    assert_eq!(body["documents_indexed"], true);
    assert_eq!(body["passages"], 1);
    assert_eq!(body["database_stats"]["total_sessions"], 0);
}

#[tokio::test]
async fn health_reports_index_failure() {
    let (_tmp, store) = temp_store().await;
    let app = router(orchestrator(store, FakeIndex::failing(), ScriptedModel::new(vec![])));

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn create_list_and_rename_sessions() {
    let (_tmp, store, app) = app(vec![]).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/session",
        Some(json!({"session_id": "s1", "context": "planner"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "session_id": "s1", "context": "planner"}));

    // Empty body creates a session with a generated id.
    let (status, body) = send(&app, Method::POST, "/session", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"], "general");
    assert_eq!(body["session_id"].as_str().unwrap().len(), 36);

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/session/s1",
        Some(json!({"name": "Todo planning"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        store.get_session("s1").await.unwrap().unwrap().name.as_deref(),
        Some("Todo planning")
    );

    let (status, body) = send(&app, Method::GET, "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    let s1 = data.iter().find(|s| s["id"] == "s1").unwrap();
    assert_eq!(s1["title"], "Todo planning");
    assert_eq!(s1["context"], "planner");
    assert_eq!(s1["messages"], json!([]));

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/session/ghost",
        Some(json!({"name": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn generate_runs_a_turn() {
    let (_tmp, store, app) = app(vec![text("Start with five minutes.")]).await;
    store.create_session(Some("s1"), Some("Essay"), None).await.unwrap();

    let (status, body) = send(
        &app,
        Method::POST,
        "/generate",
        Some(json!({"message": "I can't start", "session_id": "s1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["response"], "Start with five minutes.");
    assert_eq!(body["session_id"], "s1");
    assert!(body["message_id"].is_i64());

    let (status, body) = send(&app, Method::GET, "/conversation/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["history"][0]["role"], "human");
    assert_eq!(body["history"][1]["role"], "ai");
}

#[tokio::test]
async fn generate_maps_errors_to_status_codes() {
    let (_tmp, store, app) = app(vec![]).await;
    store.create_session(Some("s1"), Some("Essay"), None).await.unwrap();

    let (status, body) = send(
        &app,
        Method::POST,
        "/generate",
        Some(json!({"session_id": "s1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "validation");

    let (status, body) = send(
        &app,
        Method::POST,
        "/generate",
        Some(json!({"message": "hi", "session_id": "s1", "mode": "wizard"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, body) = send(
        &app,
        Method::POST,
        "/generate",
        Some(json!({"message": "hi", "session_id": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["session_id"], "ghost");

    // The scripted model has no replies left.
    let (status, body) = send(
        &app,
        Method::POST,
        "/generate",
        Some(json!({"message": "hi", "session_id": "s1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "generation");
}

#[tokio::test]
async fn clear_conversation_deactivates_session() {
    let (_tmp, store, app) = app(vec![]).await;
    store.create_session(Some("s1"), None, None).await.unwrap();
    store
        .append_message("s1", "human", "hello", None, None)
        .await
        .unwrap();

    let (status, body) = send(&app, Method::DELETE, "/conversation/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "message": "Session s1 cleared"}));
    assert!(store.get_session("s1").await.unwrap().is_none());

    let (status, body) = send(&app, Method::GET, "/conversation/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let (status, _) = send(&app, Method::DELETE, "/conversation/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_endpoints() {
    let (_tmp, store, app) = app(vec![]).await;
    store.create_session(Some("a"), None, None).await.unwrap();
    store.create_session(Some("b"), None, None).await.unwrap();
    store.deactivate_session("b").await.unwrap();

    let (_, body) = send(&app, Method::GET, "/admin/sessions", None).await;
    assert_eq!(body["count"], 1);

    let (_, body) = send(&app, Method::GET, "/admin/sessions?active_only=false", None).await;
    assert_eq!(body["count"], 2);

    let (status, body) = send(&app, Method::GET, "/admin/sessions/a", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["id"], "a");

    let (status, body) = send(&app, Method::GET, "/admin/sessions/b", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send(&app, Method::DELETE, "/admin/sessions/b", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, Method::GET, "/admin/stats", None).await;
    assert_eq!(body["stats"]["total_sessions"], 1);
    assert_eq!(body["stats"]["active_sessions"], 1);

    let (status, body) = send(&app, Method::GET, "/admin/sessions?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");
}

#[tokio::test]
async fn checklist_lifecycle() {
    let (_tmp, store, app) = app(vec![]).await;
    store.create_session(Some("s1"), None, None).await.unwrap();
    let msg = store
        .append_message("s1", "ai", "- [ ] a\n- [ ] b", None, None)
        .await
        .unwrap();
    let uri = format!("/checklist/s1/{}", msg);

    let (status, body) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!([{"task_text": "a"}, {"task_text": "b"}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["taskText"], "a");
    assert_eq!(items[0]["isCompleted"], false);
    let first_id = items[0]["id"].as_i64().unwrap();

    // The wrapped form replaces the list.
    let (status, body) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({"items": [{"task_text": "only"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    let only_id = body["items"][0]["id"].as_i64().unwrap();
    assert_ne!(only_id, first_id);

    let (status, body) = send(
        &app,
        Method::PATCH,
        &format!("/checklist/items/{}", only_id),
        Some(json!({"isCompleted": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isCompleted"], true);

    let (_, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(body["items"][0]["isCompleted"], true);

    let (status, _) = send(
        &app,
        Method::PATCH,
        "/checklist/items/9999",
        Some(json!({"is_completed": true})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::PATCH,
        &format!("/checklist/items/{}", only_id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);

    let (status, body) = send(
        &app,
        Method::POST,
        "/checklist/s1/424242",
        Some(json!([{"task_text": "x"}])),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}
