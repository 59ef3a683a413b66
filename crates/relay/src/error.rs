use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use livechat_common::{protocol::chat::ServerEvent, validation::MessageValidationError};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    AuthInvalidToken,
    AuthForbidden,
    NotFound,
    NotJoined,
    RoomUnavailable,
    MessageTooLong,
    EmptyMessage,
    SlowConsumer,
    ConnectionClosed,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::AuthInvalidToken => "AUTH_INVALID_TOKEN",
            Self::AuthForbidden => "AUTH_FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::NotJoined => "NOT_JOINED",
            Self::RoomUnavailable => "ROOM_UNAVAILABLE",
            Self::MessageTooLong => "MESSAGE_TOO_LONG",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::SlowConsumer => "SLOW_CONSUMER",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::AuthInvalidToken => StatusCode::UNAUTHORIZED,
            Self::AuthForbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotJoined => StatusCode::CONFLICT,
            Self::RoomUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::MessageTooLong => StatusCode::PAYLOAD_TOO_LARGE,
            Self::EmptyMessage => StatusCode::BAD_REQUEST,
            Self::SlowConsumer => StatusCode::TOO_MANY_REQUESTS,
            Self::ConnectionClosed => StatusCode::GONE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::RoomUnavailable | Self::SlowConsumer | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "request validation failed",
            Self::AuthInvalidToken => "invalid authentication token",
            Self::AuthForbidden => "caller lacks required permission",
            Self::NotFound => "requested resource not found",
            Self::NotJoined => "join a stream chat first",
            Self::RoomUnavailable => "stream is not live",
            Self::MessageTooLong => "message too long",
            Self::EmptyMessage => "message is empty",
            Self::SlowConsumer => "delivery queue overflowed, reconnect to resume",
            Self::ConnectionClosed => "connection closed",
            Self::InternalError => "internal server error",
        }
    }
}

/// Failures of chat operations.
///
/// Only `Connection` is terminal for a session. Every other variant is
/// reported to the originating client and leaves room state untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("connection closed")]
    Connection,

    #[error("{0}")]
    Authorization(String),

    #[error("stream {room_id} is not live")]
    RoomUnavailable { room_id: String },

    #[error("message too long (max {max} characters)")]
    MessageTooLong { len: usize, max: usize },

    #[error("message is empty")]
    EmptyMessage,

    #[error("message {message_id} not found")]
    NotFound { message_id: u64 },

    #[error("join a stream chat first")]
    NotJoined,
}

impl ChatError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Connection => ErrorCode::ConnectionClosed,
            Self::Authorization(_) => ErrorCode::AuthForbidden,
            Self::RoomUnavailable { .. } => ErrorCode::RoomUnavailable,
            Self::MessageTooLong { .. } => ErrorCode::MessageTooLong,
            Self::EmptyMessage => ErrorCode::EmptyMessage,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::NotJoined => ErrorCode::NotJoined,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Connection)
    }

    /// The `error` event sent back to the originating client.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.code().as_str(), self.to_string())
    }
}

impl From<MessageValidationError> for ChatError {
    fn from(error: MessageValidationError) -> Self {
        match error {
            MessageValidationError::Empty => Self::EmptyMessage,
            MessageValidationError::TooLong { len, max } => Self::MessageTooLong { len, max },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayError {
    code: ErrorCode,
    message: String,
    details: Value,
    request_id: Option<String>,
}

impl RelayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}), request_id: None }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl From<ChatError> for RelayError {
    fn from(error: ChatError) -> Self {
        Self::new(error.code(), error.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let request_id = self.request_id.or_else(current_request_id);

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                    "details": self.details,
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}
