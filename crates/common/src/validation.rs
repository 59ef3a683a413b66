// Chat message body validation: trim, reject empty, 500 char max.

use thiserror::Error;

/// Maximum allowed message body length in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageValidationError {
    #[error("message is empty")]
    Empty,

    #[error("message too long (max {max} characters, got {len})")]
    TooLong { len: usize, max: usize },
}

/// Validate a user-authored chat message body against the default limit.
///
/// See [`validate_message_body_with_limit`].
pub fn validate_message_body(input: &str) -> Result<String, MessageValidationError> {
    validate_message_body_with_limit(input, MAX_MESSAGE_CHARS)
}

/// Validate a user-authored chat message body.
///
/// Rules:
/// - Strip leading and trailing whitespace
/// - Reject bodies that are empty after stripping
/// - Enforce the character limit on the stripped body, counted in
///   Unicode scalar values rather than bytes
///
/// Returns the stripped body on success.
pub fn validate_message_body_with_limit(
    input: &str,
    max_chars: usize,
) -> Result<String, MessageValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(MessageValidationError::Empty);
    }

    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(MessageValidationError::TooLong { len, max: max_chars });
    }

    Ok(trimmed.to_string())
}
