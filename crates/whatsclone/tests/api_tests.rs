//! API integration tests.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;
use whatsclone::store::NewMessage;
use whatsclone::supervisor::ConnectionState;

mod common;
use common::test_app;

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _, _) = test_app().await;

    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_status_follows_connection() {
    let (app, _, board) = test_app().await;

    let (status, json) = get_json(app.clone(), "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["connected"], false);
    assert!(json["timestamp"].is_i64());

    board.set(ConnectionState::Open { user: None });
    let (_, json) = get_json(app, "/api/status").await;
    assert_eq!(json["connected"], true);
}

#[tokio::test]
async fn test_list_conversations_and_messages() {
    let (app, store, _) = test_app().await;
    store
        .record_inbound(&NewMessage::text("5511999@proto", "Ana", "5511999", "oi", 1000))
        .await
        .unwrap();
    store
        .record_inbound(&NewMessage::text("5521888@proto", "5521888", "5521888", "olá", 2000))
        .await
        .unwrap();

    let (status, json) = get_json(app.clone(), "/api/conversations").await;
    assert_eq!(status, StatusCode::OK);
    let conversations = json.as_array().unwrap();
    assert_eq!(conversations.len(), 2);
    // Most recent first
    assert_eq!(conversations[0]["id"], "5521888@proto");
    assert_eq!(conversations[1]["name"], "Ana");
    assert_eq!(conversations[1]["unreadCount"], 1);
    assert_eq!(conversations[1]["lastMessageTime"], 1000);

    let (status, json) = get_json(app, "/api/conversations/5511999@proto/messages").await;
    assert_eq!(status, StatusCode::OK);
    let messages = json.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message"], "oi");
    assert_eq!(messages[0]["isFromMe"], false);
}

#[tokio::test]
async fn test_messages_for_unknown_conversation() {
    let (app, _, _) = test_app().await;

    let (status, json) = get_json(app, "/api/conversations/000@proto/messages").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert!(json["error"].as_str().unwrap().contains("000@proto"));
}
