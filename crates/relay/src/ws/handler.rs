// Per-connection WebSocket loop.

use std::{sync::Arc, time::Duration};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use chrono::Utc;
use livechat_common::protocol::chat::{ClientEvent, ServerEvent};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use super::protocol::{
    decode_client_event, invalid_frame_event, send_event, unsupported_frame_event,
    HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES,
};
use crate::{
    chat::{
        gateway::{ChatGateway, SendOutcome},
        session::{Identity, Session},
    },
    error::{current_request_id, ChatError, ErrorCode},
    metrics,
};

type Deliveries = Option<mpsc::Receiver<ServerEvent>>;

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

async fn close_slow_consumer(socket: &mut WebSocket) {
    let event = ServerEvent::error(
        ErrorCode::SlowConsumer.as_str(),
        ErrorCode::SlowConsumer.default_message(),
    );
    let _ = send_event(socket, &event).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::AGAIN,
            reason: ErrorCode::SlowConsumer.as_str().to_string().into(),
        })))
        .await;
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Wait for the next room event. Pends forever while not in a room.
async fn next_delivery(deliveries: &mut Deliveries) -> Option<ServerEvent> {
    match deliveries {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

pub(super) async fn handle_socket(
    gateway: Arc<ChatGateway>,
    identity: Identity,
    mut socket: WebSocket,
) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let mut session = gateway.connect(identity);
    let mut deliveries: Deliveries = None;

    let status = ServerEvent::ConnectionStatus {
        status: "connected".to_string(),
        session_id: session.id(),
        username: session.username().to_string(),
        role: session.identity().role,
        timestamp: Utc::now().to_rfc3339(),
    };
    if send_event(&mut socket, &status).await.is_err() {
        gateway.disconnect(&mut session).await;
        return;
    }

    // Server pings every HEARTBEAT_INTERVAL_MS and drops the connection if
    // no pong arrives within HEARTBEAT_TIMEOUT_MS of an unanswered ping.
    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset();
    let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                pong_deadline.get_or_insert_with(|| Instant::now() + heartbeat_timeout);
            }
            _ = wait_until(pong_deadline) => {
                warn!(
                    session_id = %session.id(),
                    request_id = %request_id,
                    "heartbeat timeout, disconnecting"
                );
                break;
            }
            maybe_delivery = next_delivery(&mut deliveries) => {
                match maybe_delivery {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        warn!(
                            session_id = %session.id(),
                            request_id = %request_id,
                            "delivery queue closed by room, disconnecting slow consumer"
                        );
                        close_slow_consumer(&mut socket).await;
                        break;
                    }
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        let Ok(event) = decode_client_event(&raw_message) else {
                            metrics::record_ws_request("invalid_frame", true, 0);
                            if send_event(&mut socket, &invalid_frame_event()).await.is_err() {
                                break;
                            }
                            continue;
                        };

                        let kind = event.kind();
                        let started_at = Instant::now();
                        let result =
                            dispatch_client_event(&gateway, &mut session, &mut deliveries, event)
                                .await;
                        let elapsed_ms = started_at.elapsed().as_millis() as u64;

                        let replies = match result {
                            Ok(replies) => {
                                metrics::record_ws_request(kind, false, elapsed_ms);
                                replies
                            }
                            Err(error) => {
                                metrics::record_ws_request(kind, true, elapsed_ms);
                                debug!(
                                    session_id = %session.id(),
                                    event = kind,
                                    code = error.code().as_str(),
                                    "client event rejected"
                                );
                                if error.is_terminal() {
                                    let _ = send_event(&mut socket, &error.to_event()).await;
                                    break;
                                }
                                vec![error.to_event()]
                            }
                        };

                        let mut send_failed = false;
                        for reply in &replies {
                            if send_event(&mut socket, reply).await.is_err() {
                                send_failed = true;
                                break;
                            }
                        }
                        if send_failed {
                            break;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        if send_event(&mut socket, &unsupported_frame_event()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        pong_deadline = None;
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            warn!(
                                session_id = %session.id(),
                                request_id = %request_id,
                                "closing connection after oversized frame"
                            );
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    drop(deliveries);
    gateway.disconnect(&mut session).await;
    info!(session_id = %session.id(), request_id = %request_id, "websocket closed");
}

/// Run one client event against the gateway and collect the replies
/// addressed to this client only. Room-wide effects arrive on the delivery
/// queue.
async fn dispatch_client_event(
    gateway: &ChatGateway,
    session: &mut Session,
    deliveries: &mut Deliveries,
    event: ClientEvent,
) -> Result<Vec<ServerEvent>, ChatError> {
    match event {
        ClientEvent::JoinStreamChat { room_id } => {
            let joined = gateway.join(session, &room_id).await?;
            if let Some(receiver) = joined.deliveries {
                *deliveries = Some(receiver);
            }
            Ok(vec![
                ServerEvent::JoinSuccess {
                    room_id: joined.room_id.clone(),
                    user_count: joined.user_count,
                },
                ServerEvent::ChatHistory { room_id: joined.room_id, messages: joined.history },
            ])
        }
        ClientEvent::LeaveStreamChat { room_id } => {
            if session.room_id() == Some(room_id.trim()) {
                gateway.leave(session).await;
                *deliveries = None;
            }
            Ok(Vec::new())
        }
        ClientEvent::SendMessage { room_id, message } => {
            match gateway.send_message(session, room_id.trim(), &message).await? {
                SendOutcome::Published(_) => Ok(Vec::new()),
                SendOutcome::Blocked { reason } => Ok(vec![ServerEvent::MessageBlocked { reason }]),
            }
        }
        ClientEvent::DeleteMessage { message_id } => {
            gateway.delete_message(session, message_id).await?;
            Ok(Vec::new())
        }
        ClientEvent::GetChatStats { room_id } => {
            Ok(vec![gateway.stats(room_id.trim()).await.into_event()])
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use livechat_common::protocol::chat::{ClientEvent, ServerEvent};

    use super::{dispatch_client_event, frame_size_exceeded_reason, Deliveries};
    use crate::chat::{gateway::ChatGateway, session::Identity};

    #[test]
    fn frame_size_reason_names_the_limit() {
        assert_eq!(
            frame_size_exceeded_reason(),
            "websocket frame exceeds maximum size of 65536 bytes"
        );
    }

    #[tokio::test]
    async fn join_replies_with_ack_then_history_and_swaps_queue() {
        let gateway = Arc::new(ChatGateway::default());
        let mut session = gateway.connect(Identity::anonymous("Anonymous-0001"));
        let mut deliveries: Deliveries = None;

        let replies = dispatch_client_event(
            &gateway,
            &mut session,
            &mut deliveries,
            ClientEvent::JoinStreamChat { room_id: "42".into() },
        )
        .await
        .expect("join should succeed");

        assert!(matches!(
            replies.as_slice(),
            [
                ServerEvent::JoinSuccess { user_count: 1, .. },
                ServerEvent::ChatHistory { messages, .. },
            ] if messages.is_empty()
        ));
        let receiver = deliveries.as_mut().expect("join should hand out a delivery queue");
        assert!(matches!(
            receiver.try_recv(),
            Ok(ServerEvent::UserJoined { user_count: 1, .. })
        ));
    }

    #[tokio::test]
    async fn leaving_another_room_is_a_no_op() {
        let gateway = Arc::new(ChatGateway::default());
        let mut session = gateway.connect(Identity::anonymous("Anonymous-0002"));
        let mut deliveries: Deliveries = None;

        dispatch_client_event(
            &gateway,
            &mut session,
            &mut deliveries,
            ClientEvent::JoinStreamChat { room_id: "42".into() },
        )
        .await
        .expect("join should succeed");

        dispatch_client_event(
            &gateway,
            &mut session,
            &mut deliveries,
            ClientEvent::LeaveStreamChat { room_id: "43".into() },
        )
        .await
        .expect("leave should not fail");
        assert_eq!(session.room_id(), Some("42"));
        assert!(deliveries.is_some());

        dispatch_client_event(
            &gateway,
            &mut session,
            &mut deliveries,
            ClientEvent::LeaveStreamChat { room_id: "42".into() },
        )
        .await
        .expect("leave should not fail");
        assert_eq!(session.room_id(), None);
        assert!(deliveries.is_none());
    }

    #[tokio::test]
    async fn stats_for_unknown_room_are_zero() {
        let gateway = Arc::new(ChatGateway::default());
        let mut session = gateway.connect(Identity::anonymous("Anonymous-0003"));
        let mut deliveries: Deliveries = None;

        let replies = dispatch_client_event(
            &gateway,
            &mut session,
            &mut deliveries,
            ClientEvent::GetChatStats { room_id: "nope".into() },
        )
        .await
        .expect("stats should succeed");

        assert_eq!(
            replies,
            vec![ServerEvent::ChatStats {
                room_id: "nope".into(),
                total_messages: 0,
                active_users: 0
            }]
        );
    }
}
