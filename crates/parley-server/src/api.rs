use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::Method,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::protocol::{
    AuthResponse, ChatSummary, LoginRequest, MessageRequest, MessageResponse, SignupRequest,
    UserProfile,
};
use parley_shared::{ChatId, MessageId, MessageStatus, User, UserId};
use parley_store::Database;

use crate::auth::{self, AuthUser, TokenKeys};
use crate::broker::Broker;
use crate::chats;
use crate::dispatch;
use crate::error::ApiError;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub broker: Arc<Broker>,
    pub tokens: Arc<TokenKeys>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/messages/send", post(send_message))
        .route("/api/messages/chat/{chat_id}", get(chat_history))
        .route("/api/messages/chat/{chat_id}/all", get(all_chat_messages))
        .route("/api/messages/{message_id}/status", put(update_status))
        .route("/api/chats", get(list_chats))
        .route("/api/chats/{chat_id}", get(chat_detail))
        .route("/api/users", get(list_users))
        .route("/api/users/profile", get(own_profile))
        .route("/api/users/{user_id}", get(user_detail))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let name = req.name.trim();
    let email = req.email.trim().to_ascii_lowercase();
    let mobile = req.mobile.trim();
    if name.is_empty() || email.is_empty() || mobile.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "name, email, mobile and password are required".into(),
        ));
    }

    if state.db.user_by_email(&email)?.is_some() {
        return Err(ApiError::Conflict("email already registered".into()));
    }
    if state.db.user_by_mobile(mobile)?.is_some() {
        return Err(ApiError::Conflict("mobile already registered".into()));
    }

    let user = User {
        id: UserId::new(),
        name: name.to_owned(),
        email,
        mobile: mobile.to_owned(),
        password_hash: auth::hash_password(&req.password)?,
        avatar: req.avatar,
        created_at: chrono::Utc::now(),
    };
    state.db.insert_user(&user)?;
    info!(user_id = %user.id, "user registered");

    let token = state.tokens.issue(user.id)?;
    Ok(Json(AuthResponse {
        token,
        user_id: user.id,
        name: user.name,
        email: user.email,
    }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let identifier = req.email_or_mobile.trim();
    let user = state
        .db
        .user_by_email_or_mobile(identifier)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".into()))?;

    if !auth::verify_password(&user.password_hash, &req.password) {
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let token = state.tokens.issue(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        token,
        user_id: user.id,
        name: user.name,
        email: user.email,
    }))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender): AuthUser,
    Json(req): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message =
        dispatch::send_message(&state.db, &state.broker, sender, req.receiver_id, &req.content)
            .await?;
    Ok(Json(MessageResponse::from(&message)))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    page: u32,
    #[serde(default = "default_page_size")]
    size: u32,
}

fn default_page_size() -> u32 {
    dispatch::DEFAULT_PAGE_SIZE
}

async fn chat_history(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let messages = dispatch::chat_history(&state.db, chat_id, requester, query.page, query.size)?;
    Ok(Json(messages.iter().map(MessageResponse::from).collect()))
}

async fn all_chat_messages(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let messages = dispatch::all_chat_messages(&state.db, chat_id, requester)?;
    Ok(Json(messages.iter().map(MessageResponse::from).collect()))
}

#[derive(Deserialize)]
struct StatusQuery {
    status: String,
}

// Deliberately unauthenticated; the original contract lets any caller
// flip a delivery status.
async fn update_status(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let status = MessageStatus::from_str_tag(&query.status)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {}", query.status)))?;
    let message = dispatch::update_status(&state.db, message_id, status)?;
    Ok(Json(MessageResponse::from(&message)))
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

async fn list_chats(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    Ok(Json(chats::chats_with_previews(&state.db, requester)?))
}

async fn chat_detail(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<ChatSummary>, ApiError> {
    if !chats::is_participant(&state.db, chat_id, requester)? {
        return Err(ApiError::Forbidden("not a participant of this chat".into()));
    }
    let chat = state.db.chat_by_id(chat_id)?;
    let summary = match state.db.last_message_for_chat(chat_id)? {
        Some(last) => ChatSummary::from_chat(&chat).with_last_message(&last),
        None => ChatSummary::from_chat(&chat),
    };
    Ok(Json(summary))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

async fn list_users(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let users = state.db.users_except(requester)?;
    Ok(Json(users.iter().map(UserProfile::from).collect()))
}

async fn own_profile(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
) -> Result<Json<UserProfile>, ApiError> {
    let user = state.db.user_by_id(requester)?;
    Ok(Json(UserProfile::from(&user)))
}

// Public lookup; only the directory listing and own-profile routes are
// gated on a token.
async fn user_detail(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<UserProfile>, ApiError> {
    let user = state.db.user_by_id(user_id)?;
    Ok(Json(UserProfile::from(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            db: Arc::new(Database::open_in_memory().unwrap()),
            broker: Arc::new(Broker::new()),
            tokens: Arc::new(TokenKeys::new("test-secret", 1)),
        }
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn authed_request(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"));
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register(router: &Router, name: &str) -> (String, String) {
        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/signup",
                json!({
                    "name": name,
                    "email": format!("{name}@example.com"),
                    "mobile": format!("55-{name}"),
                    "password": "hunter2",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        (
            body["token"].as_str().unwrap().to_owned(),
            body["userId"].as_str().unwrap().to_owned(),
        )
    }

    #[tokio::test]
    async fn health_endpoint() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn signup_then_login() {
        let router = build_router(test_state());
        let (_, user_id) = register(&router, "alice").await;

        let response = router
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                json!({ "emailOrMobile": "alice@example.com", "password": "hunter2" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["userId"], user_id);
        assert!(body["token"].as_str().is_some());
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let router = build_router(test_state());
        register(&router, "alice").await;

        let response = router
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                json!({ "emailOrMobile": "alice@example.com", "password": "wrong" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let router = build_router(test_state());
        register(&router, "alice").await;

        let response = router
            .oneshot(json_request(
                "POST",
                "/api/auth/signup",
                json!({
                    "name": "alice2",
                    "email": "alice@example.com",
                    "mobile": "5591234",
                    "password": "hunter2",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn protected_routes_require_token() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::builder().uri("/api/chats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn send_message_and_read_history() {
        let router = build_router(test_state());
        let (alice_token, _) = register(&router, "alice").await;
        let (bob_token, bob_id) = register(&router, "bob").await;

        let response = router
            .clone()
            .oneshot(authed_request(
                "POST",
                "/api/messages/send",
                &alice_token,
                Some(json!({ "receiverId": bob_id, "content": "hello bob" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let sent = response_json(response).await;
        assert_eq!(sent["content"], "hello bob");
        assert_eq!(sent["status"], "SENT");
        let chat_id = sent["chatId"].as_str().unwrap().to_owned();

        // Both participants can read it back.
        for token in [&alice_token, &bob_token] {
            let response = router
                .clone()
                .oneshot(authed_request(
                    "GET",
                    &format!("/api/messages/chat/{chat_id}"),
                    token,
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let page = response_json(response).await;
            assert_eq!(page.as_array().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn outsider_cannot_read_history() {
        let router = build_router(test_state());
        let (alice_token, _) = register(&router, "alice").await;
        let (_, bob_id) = register(&router, "bob").await;
        let (eve_token, _) = register(&router, "eve").await;

        let response = router
            .clone()
            .oneshot(authed_request(
                "POST",
                "/api/messages/send",
                &alice_token,
                Some(json!({ "receiverId": bob_id, "content": "secret" })),
            ))
            .await
            .unwrap();
        let chat_id = response_json(response).await["chatId"]
            .as_str()
            .unwrap()
            .to_owned();

        for uri in [
            format!("/api/messages/chat/{chat_id}"),
            format!("/api/messages/chat/{chat_id}/all"),
            format!("/api/chats/{chat_id}"),
        ] {
            let response = router
                .clone()
                .oneshot(authed_request("GET", &uri, &eve_token, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[tokio::test]
    async fn repeated_sends_share_one_chat() {
        let router = build_router(test_state());
        let (alice_token, _) = register(&router, "alice").await;
        let (bob_token, bob_id) = register(&router, "bob").await;

        let mut chat_ids = Vec::new();
        for content in ["one", "two"] {
            let response = router
                .clone()
                .oneshot(authed_request(
                    "POST",
                    "/api/messages/send",
                    &alice_token,
                    Some(json!({ "receiverId": bob_id, "content": content })),
                ))
                .await
                .unwrap();
            chat_ids.push(response_json(response).await["chatId"].as_str().unwrap().to_owned());
        }
        assert_eq!(chat_ids[0], chat_ids[1]);

        let response = router
            .clone()
            .oneshot(authed_request("GET", "/api/chats", &bob_token, None))
            .await
            .unwrap();
        let chats = response_json(response).await;
        assert_eq!(chats.as_array().unwrap().len(), 1);
        assert_eq!(chats[0]["lastMessage"], "two");
    }

    #[tokio::test]
    async fn status_update_round_trip() {
        let router = build_router(test_state());
        let (alice_token, _) = register(&router, "alice").await;
        let (_, bob_id) = register(&router, "bob").await;

        let response = router
            .clone()
            .oneshot(authed_request(
                "POST",
                "/api/messages/send",
                &alice_token,
                Some(json!({ "receiverId": bob_id, "content": "ping" })),
            ))
            .await
            .unwrap();
        let message_id = response_json(response).await["id"].as_str().unwrap().to_owned();

        // The status route takes no token; receipts may come from anywhere.
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/api/messages/{message_id}/status?status=READ"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["status"], "READ");

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/api/messages/{message_id}/status?status=BOGUS"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn user_listing_excludes_self() {
        let router = build_router(test_state());
        let (alice_token, alice_id) = register(&router, "alice").await;
        register(&router, "bob").await;

        let response = router
            .clone()
            .oneshot(authed_request("GET", "/api/users", &alice_token, None))
            .await
            .unwrap();
        let users = response_json(response).await;
        let users = users.as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_ne!(users[0]["id"], alice_id);
        assert!(users[0].get("passwordHash").is_none());

        let response = router
            .clone()
            .oneshot(authed_request("GET", "/api/users/profile", &alice_token, None))
            .await
            .unwrap();
        assert_eq!(response_json(response).await["id"], alice_id);
    }

    #[tokio::test]
    async fn user_lookup_needs_no_token() {
        let router = build_router(test_state());
        let (_, alice_id) = register(&router, "alice").await;

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/users/{alice_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["id"], alice_id);
        assert!(body.get("passwordHash").is_none());
    }
}
