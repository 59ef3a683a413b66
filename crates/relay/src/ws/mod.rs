mod handler;
pub mod protocol;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use self::protocol::MAX_FRAME_BYTES;
use crate::{
    auth::{identity::resolve_identity, jwt::JwtIdentityService},
    chat::gateway::ChatGateway,
    error::{request_id_from_headers_or_generate, with_request_id_scope},
};

#[derive(Clone)]
pub struct ChatRouterState {
    gateway: Arc<ChatGateway>,
    identity_service: Arc<JwtIdentityService>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpgradeQuery {
    token: Option<String>,
}

pub fn router(gateway: Arc<ChatGateway>, identity_service: Arc<JwtIdentityService>) -> Router {
    let state = ChatRouterState { gateway, identity_service };

    Router::new()
        .route("/v1/chat/ws", get(ws_upgrade))
        .route("/v1/rooms/{room_id}/stats", get(room_stats))
        .with_state(state)
}

pub async fn ws_upgrade(
    State(state): State<ChatRouterState>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    let identity =
        match resolve_identity(&state.identity_service, &headers, query.token.as_deref()) {
            Ok(identity) => identity,
            Err(error) => return error.with_request_id(request_id).into_response(),
        };

    info!(
        request_id = %request_id,
        username = %identity.username,
        anonymous = identity.is_anonymous(),
        "chat websocket upgrade"
    );

    let gateway = Arc::clone(&state.gateway);
    ws.max_frame_size(MAX_FRAME_BYTES as usize)
        .max_message_size(MAX_FRAME_BYTES as usize)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handler::handle_socket(gateway, identity, socket))
                .await;
        })
        .into_response()
}

pub async fn room_stats(
    State(state): State<ChatRouterState>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    Json(state.gateway.stats(&room_id).await)
}
