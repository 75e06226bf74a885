//! Content API and peer wire endpoints of a single instance.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use rssx_adapters::{HttpServer, ServerConfig};
use rssx_federation::{AbuseConfig, NodeConfig, RelayConfig, RssxNode};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_app(temp_dir: &TempDir) -> (Router, Arc<RssxNode>) {
    let path = |name: &str| temp_dir.path().join(name).to_string_lossy().to_string();
    let node = Arc::new(
        RssxNode::new(NodeConfig {
            db_path: path("db"),
            public_host: "a.example".to_string(),
            private_key_file: path("private.pem"),
            public_key_file: path("public.pem"),
            abuse: AbuseConfig::default(),
            relay: RelayConfig {
                peer_timeout_ms: 500,
                ..Default::default()
            },
        })
        .unwrap(),
    );

    let server = HttpServer::new(
        ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            jwt_secret: "test secret".to_string(),
            token_expiry_hours: 1,
        },
        node.clone(),
    );
    (server.router(), node)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn login(app: &Router, username: &str) -> String {
    let credentials = json!({ "username": username, "password": "pw" });
    let (status, _) = send(app, Method::POST, "/api/register", None, Some(credentials.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(app, Method::POST, "/api/login", None, Some(credentials)).await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_register_and_login() {
    let temp_dir = TempDir::new().unwrap();
    let (app, node) = test_app(&temp_dir);

    let token = login(&app, "alice").await;
    assert!(!token.is_empty());
    assert!(node.get_user("alice").unwrap().unwrap().last_login.is_some());

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/register",
        None,
        Some(json!({ "username": "alice", "password": "other" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/login",
        None,
        Some(json!({ "username": "alice", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/register",
        None,
        Some(json!({ "username": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::GET, "/api/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["popularity"], 0);
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn test_writes_require_a_token() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = test_app(&temp_dir);

    let body = Some(json!({ "content": "hello" }));
    let (status, _) = send(&app, Method::POST, "/api/post", None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::POST, "/api/post", Some("forged"), body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::GET, "/api/profile", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_post_comment_and_feed() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = test_app(&temp_dir);
    let token = login(&app, "alice").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/post",
        Some(&token),
        Some(json!({ "content": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let post_id = body["post_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/post",
        Some(&token),
        Some(json!({ "content": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/comment",
        Some(&token),
        Some(json!({ "post_id": post_id, "content": "first!" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/comment",
        Some(&token),
        Some(json!({ "post_id": "missing", "content": "lost" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::GET, "/api/feed", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let posts = body["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["content"], "hello");
    assert_eq!(posts[0]["comments"][0]["content"], "first!");

    let (status, body) = send(&app, Method::GET, &format!("/api/post/{}", post_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["author"], "alice");

    let (status, _) = send(&app, Method::GET, "/api/post/missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_votes() {
    let temp_dir = TempDir::new().unwrap();
    let (app, node) = test_app(&temp_dir);
    let alice = login(&app, "alice").await;
    let bob = login(&app, "bob").await;

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/post",
        Some(&alice),
        Some(json!({ "content": "hello" })),
    )
    .await;
    let vote = json!({ "post_id": body["post_id"] });

    let (status, body) = send(&app, Method::POST, "/api/upvote", Some(&bob), Some(vote.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["upvotes"], 1);

    let (status, body) = send(&app, Method::POST, "/api/upvote", Some(&bob), Some(vote.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Already upvoted this content");

    let (status, body) = send(&app, Method::POST, "/api/downvote", Some(&bob), Some(vote)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["upvotes"], 0);
    assert_eq!(body["downvotes"], 1);
    assert_eq!(node.profile("alice").unwrap().popularity, 0);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/upvote",
        Some(&bob),
        Some(json!({ "post_id": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_receive_vote_from_peer() {
    let temp_dir = TempDir::new().unwrap();
    let (app, node) = test_app(&temp_dir);
    let post = node.create_post("alice", "hello").await.unwrap();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/receive_vote",
        None,
        Some(json!({ "post_id": post.id, "vote_type": "downvote", "voter": "bob@b.example" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["downvotes"], 1);
    assert_eq!(body["upvotes"], 0);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/receive_vote",
        None,
        Some(json!({ "vote_type": "downvote" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("post_id"));
}

#[tokio::test]
async fn test_receive_post_rejects_incomplete_envelope() {
    let temp_dir = TempDir::new().unwrap();
    let (app, node) = test_app(&temp_dir);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/receive_post",
        None,
        Some(json!({ "author": "mallory", "timestamp": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("content"));
    assert!(error.contains("signature"));

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/receive_post",
        None,
        Some(json!({
            "author": "mallory",
            "timestamp": 1,
            "content": "bm90IHNlYWxlZA==",
            "signature": "00",
            "federated_from": "m.example",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(node.feed().unwrap().is_empty());
}

#[tokio::test]
async fn test_servers_and_public_endpoints() {
    let temp_dir = TempDir::new().unwrap();
    let (app, node) = test_app(&temp_dir);
    let token = login(&app, "alice").await;

    let server = Some(json!({ "server_url": "http://b.example" }));
    let (status, _) = send(&app, Method::POST, "/api/add_server", Some(&token), server.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, Method::POST, "/api/add_server", Some(&token), server).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, Method::GET, "/api/list_servers", None, None).await;
    assert_eq!(body["connected_servers"], json!(["http://b.example"]));

    let (status, body) = send(&app, Method::GET, "/api/public_key", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["public_key"], node.public_key_pem());

    let (_, body) = send(&app, Method::GET, "/api/health", None, None).await;
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, Method::GET, "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["public_host"], "a.example");
}
