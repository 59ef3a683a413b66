use axum::extract::ws::{Message, WebSocket};
use livechat_common::protocol::chat::{ClientEvent, ServerEvent};

pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const MAX_FRAME_BYTES: u64 = 65_536;

pub const INVALID_FRAME_CODE: &str = "INVALID_FRAME";
pub const UNSUPPORTED_FRAME_CODE: &str = "UNSUPPORTED_FRAME";

pub fn decode_client_event(raw: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str::<ClientEvent>(raw)
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_server_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

pub fn invalid_frame_event() -> ServerEvent {
    ServerEvent::error(INVALID_FRAME_CODE, "frame is not a valid chat event")
}

pub fn unsupported_frame_event() -> ServerEvent {
    ServerEvent::error(UNSUPPORTED_FRAME_CODE, "only JSON text frames are supported")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_timeout_is_shorter_than_interval() {
        assert_eq!(HEARTBEAT_INTERVAL_MS, 15_000);
        assert_eq!(HEARTBEAT_TIMEOUT_MS, 10_000);
        assert!(HEARTBEAT_TIMEOUT_MS < HEARTBEAT_INTERVAL_MS);
    }

    #[test]
    fn decodes_tagged_client_events() {
        let event = decode_client_event(r#"{"type":"send_message","room_id":"42","message":"hi"}"#)
            .expect("send_message should decode");
        assert_eq!(
            event,
            ClientEvent::SendMessage { room_id: "42".into(), message: "hi".into() }
        );

        assert!(decode_client_event(r#"{"type":"shout","room_id":"42"}"#).is_err());
        assert!(decode_client_event("not json").is_err());
    }

    #[test]
    fn error_frames_use_stable_codes() {
        assert_eq!(
            invalid_frame_event(),
            ServerEvent::Error {
                code: "INVALID_FRAME".into(),
                message: "frame is not a valid chat event".into()
            }
        );
        assert!(matches!(
            unsupported_frame_event(),
            ServerEvent::Error { code, .. } if code == UNSUPPORTED_FRAME_CODE
        ));
    }
}
