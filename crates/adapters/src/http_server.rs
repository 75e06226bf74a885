//! HTTP server.
//!
//! Everything is served under `/api`: the peer wire protocol used by other
//! instances, and the content API used by clients. Results that were
//! forwarded to an origin are answered with the origin's status and body.

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rssx_federation::{Delivery, RelayResponse, RssxNode};
use rssx_protocol::{
    Envelope, FeedPost, FeedResponse, PublicKeyResponse, UserProfile, VoteEnvelope, VoteType,
    PROTOCOL_VERSION, RELAY_HOPS_HEADER,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::auth::{hash_password, verify_password, AuthUser, TokenIssuer};
use crate::error::ApiError;

/// Secret used when neither the config nor `RSSX_JWT_SECRET` provides one
pub const DEV_JWT_SECRET: &str = "rssx-development-secret";

/// Configuration for the HTTP server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub listen_addr: String,
    /// HS256 secret for session tokens
    pub jwt_secret: String,
    pub token_expiry_hours: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            jwt_secret: std::env::var("RSSX_JWT_SECRET")
                .unwrap_or_else(|_| DEV_JWT_SECRET.to_string()),
            token_expiry_hours: 24,
        }
    }
}

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<RssxNode>,
    pub tokens: TokenIssuer,
}

/// HTTP server for one node
pub struct HttpServer {
    config: ServerConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: ServerConfig, node: Arc<RssxNode>) -> Self {
        if config.jwt_secret == DEV_JWT_SECRET {
            warn!("Using the development JWT secret; set RSSX_JWT_SECRET in production");
        }

        let tokens = TokenIssuer::new(&config.jwt_secret, config.token_expiry_hours);
        Self {
            config,
            state: AppState { node, tokens },
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen_addr))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().context("Listener has no local address")?;
        info!(
            %addr,
            public_host = %self.state.node.public_host(),
            "RSSX instance listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // peer wire protocol
        .route("/public_key", get(public_key))
        .route("/receive_post", post(receive_post))
        .route("/receive_comment", post(receive_comment))
        .route("/receive_vote", post(receive_vote))
        .route("/feed", get(feed))
        // content API
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/post", post(create_post))
        .route("/post/:id", get(get_post))
        .route("/comment", post(create_comment))
        .route("/upvote", post(upvote))
        .route("/downvote", post(downvote))
        .route("/list_servers", get(list_servers))
        .route("/add_server", post(add_server))
        .route("/profile", get(profile))
        .route("/health", get(health));

    Router::new()
        .route("/", get(banner))
        .nest("/api", api)
        .with_state(state)
}

fn relay_hops(headers: &HeaderMap) -> u32 {
    headers
        .get(RELAY_HOPS_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Answer with what the origin answered.
fn relayed(response: RelayResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    (status, Json(response.body)).into_response()
}

fn required(value: Option<String>, reason: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(reason))
}

// ----- peer wire protocol -----

async fn public_key(State(state): State<AppState>) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        public_key: state.node.public_key_pem(),
    })
}

async fn receive_post(
    State(state): State<AppState>,
    Json(envelope): Json<Envelope>,
) -> Result<Response, ApiError> {
    let stored = state.node.receive_post(&envelope).await?;
    let response = if stored.created {
        (
            StatusCode::CREATED,
            Json(json!({ "message": "Post received", "post_id": stored.id })),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({ "message": "Post already exists", "post_id": stored.id })),
        )
    };
    Ok(response.into_response())
}

async fn receive_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(envelope): Json<Envelope>,
) -> Result<Response, ApiError> {
    match state
        .node
        .receive_comment(&envelope, relay_hops(&headers))
        .await?
    {
        Delivery::Applied(stored) => {
            let status = if stored.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            Ok((
                status,
                Json(json!({ "message": "Comment received", "comment_id": stored.id })),
            )
                .into_response())
        }
        Delivery::Forwarded(response) => Ok(relayed(response)),
    }
}

async fn receive_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(vote): Json<VoteEnvelope>,
) -> Result<Response, ApiError> {
    match state.node.receive_vote(&vote, relay_hops(&headers)).await? {
        Delivery::Applied(outcome) => Ok(Json(outcome).into_response()),
        Delivery::Forwarded(response) => Ok(relayed(response)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct FeedQuery {
    #[serde(default)]
    federated: bool,
}

async fn feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, ApiError> {
    let posts = if query.federated {
        state.node.federated_feed().await?
    } else {
        state.node.feed()?
    };
    Ok(Json(FeedResponse { posts }))
}

// ----- content API -----

#[derive(Debug, Default, Deserialize)]
struct Credentials {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let username = required(body.username, "Username and password required")?;
    let password = required(body.password, "Username and password required")?;

    let user = state.node.register(&username, &hash_password(&password)?)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered", "username": user.username })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let username = required(body.username, "Username and password required")?;
    let password = required(body.password, "Username and password required")?;

    let user = state
        .node
        .get_user(&username)?
        .filter(|user| verify_password(&password, &user.password_hash))
        .ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

    state.node.record_login(&user.username)?;
    let token = state.tokens.issue(&user.username)?;
    info!(user = %user.username, "User logged in");
    Ok(Json(json!({ "token": token, "username": user.username })))
}

#[derive(Debug, Default, Deserialize)]
struct PostBody {
    #[serde(default)]
    content: Option<String>,
}

async fn create_post(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Json(body): Json<PostBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let content = body.content.unwrap_or_default();
    let post = state.node.create_post(&username, &content).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Post created", "post_id": post.id, "post": post })),
    ))
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FeedPost>, ApiError> {
    Ok(Json(state.node.get_post(&id)?))
}

#[derive(Debug, Default, Deserialize)]
struct CommentBody {
    #[serde(default)]
    post_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

async fn create_comment(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Json(body): Json<CommentBody>,
) -> Result<Response, ApiError> {
    let post_id = required(body.post_id, "Post ID and content required")?;
    let content = body.content.unwrap_or_default();

    match state
        .node
        .create_comment(&username, &post_id, &content)
        .await?
    {
        Delivery::Applied(comment) => Ok((
            StatusCode::CREATED,
            Json(json!({ "message": "Comment added", "comment_id": comment.id })),
        )
            .into_response()),
        Delivery::Forwarded(response) => Ok(relayed(response)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct VoteBody {
    #[serde(default)]
    post_id: Option<String>,
}

async fn cast_vote(
    state: AppState,
    username: String,
    body: VoteBody,
    vote_type: VoteType,
) -> Result<Response, ApiError> {
    let post_id = required(body.post_id, "Post ID required")?;
    match state.node.vote(&username, &post_id, vote_type).await? {
        Delivery::Applied(outcome) => Ok(Json(outcome).into_response()),
        Delivery::Forwarded(response) => Ok(relayed(response)),
    }
}

async fn upvote(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Json(body): Json<VoteBody>,
) -> Result<Response, ApiError> {
    cast_vote(state, username, body, VoteType::Upvote).await
}

async fn downvote(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Json(body): Json<VoteBody>,
) -> Result<Response, ApiError> {
    cast_vote(state, username, body, VoteType::Downvote).await
}

async fn list_servers(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let urls: Vec<String> = state
        .node
        .list_peers()?
        .into_iter()
        .map(|peer| peer.url)
        .collect();
    Ok(Json(json!({ "connected_servers": urls })))
}

#[derive(Debug, Default, Deserialize)]
struct AddServerBody {
    #[serde(default)]
    server_url: Option<String>,
}

async fn add_server(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Json(body): Json<AddServerBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let url = required(body.server_url, "Server URL is required")?;
    state.node.add_peer(&url)?;
    info!(user = %username, peer = %url, "Server added");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": format!("Server {} added", url) })),
    ))
}

async fn profile(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.node.profile(&username)?))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp(),
        "uptime_secs": state.node.uptime_secs(),
        "relay": state.node.relay_stats(),
    }))
}

async fn banner(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "RSSX federated instance",
        "version": PROTOCOL_VERSION,
        "public_host": state.node.public_host(),
        "endpoints": [
            "GET  /api/public_key",
            "POST /api/receive_post",
            "POST /api/receive_comment",
            "POST /api/receive_vote",
            "GET  /api/feed[?federated=true]",
            "POST /api/register",
            "POST /api/login",
            "POST /api/post",
            "GET  /api/post/{id}",
            "POST /api/comment",
            "POST /api/upvote",
            "POST /api/downvote",
            "GET  /api/list_servers",
            "POST /api/add_server",
            "GET  /api/profile",
            "GET  /api/health",
        ],
    }))
}
