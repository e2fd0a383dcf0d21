use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use application::{FriendRequestDto, RoomDto, UserDto, ChatEvent};
use domain::{FriendRequestId, MessageId, RoomId, UserId};

use crate::{
    auth::{bearer_token, AuthUser},
    error::ApiError,
    state::AppState,
    ws_connection,
};

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    /// 客户端已有的最后一条消息 id，缺省从头开始
    after: Option<i64>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/rooms", get(list_rooms))
        .route("/rooms/{room_id}/messages", get(get_history))
        .route("/rooms/{room_id}/peer", get(room_peer))
        .route("/friend-requests", get(list_friend_requests))
        // 同一层级的路径参数必须同名：POST /{id} 的 id 是目标用户，其余是请求 id
        .route("/friend-requests/{id}", post(send_friend_request))
        .route("/friend-requests/{id}/accept", post(accept_friend_request))
        .route("/friend-requests/{id}/decline", post(decline_friend_request))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 认证在升级之前完成；失败返回 401，不分配任何会话资源
async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = match query.token {
        Some(token) if !token.is_empty() => token,
        _ => bearer_token(&headers)?.to_owned(),
    };

    let session = state.session_manager.open(&token).await?;
    let idle_timeout = state.idle_timeout;

    Ok(ws.on_upgrade(move |socket| ws_connection::run(socket, session, idle_timeout)))
}

async fn list_rooms(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<Vec<RoomDto>>, ApiError> {
    let rooms = state.chat_service.list_rooms(identity.user_id).await?;
    Ok(Json(rooms))
}

async fn get_history(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(room_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatEvent>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let after = query.after.map(MessageId).unwrap_or(MessageId::BEGINNING);

    let events = state
        .chat_service
        .history(identity.user_id, RoomId(room_id), after, Some(limit))
        .await?;
    Ok(Json(events))
}

async fn room_peer(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(room_id): Path<i64>,
) -> Result<Json<UserDto>, ApiError> {
    let peer = state
        .chat_service
        .room_peer(identity.user_id, RoomId(room_id))
        .await?;
    Ok(Json(peer))
}

async fn list_friend_requests(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<Vec<FriendRequestDto>>, ApiError> {
    let requests = state
        .friend_request_service
        .list_incoming(identity.user_id)
        .await?;
    Ok(Json(requests))
}

async fn send_friend_request(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(to_user): Path<i64>,
) -> Result<(StatusCode, Json<FriendRequestDto>), ApiError> {
    let dto = state
        .friend_request_service
        .send(identity.user_id, UserId(to_user))
        .await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

async fn accept_friend_request(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(request_id): Path<i64>,
) -> Result<Json<RoomDto>, ApiError> {
    let room = state
        .friend_request_service
        .accept(FriendRequestId(request_id), identity.user_id)
        .await?;
    Ok(Json(room))
}

async fn decline_friend_request(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(request_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .friend_request_service
        .decline(FriendRequestId(request_id), identity.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
