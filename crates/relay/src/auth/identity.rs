use crate::{
    auth::jwt::JwtIdentityService,
    chat::session::Identity,
    error::{ErrorCode, RelayError},
};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use rand::Rng;
use tracing::debug;

/// Work out who is connecting from the upgrade request.
///
/// The `Authorization: Bearer` header wins over the `token` query
/// parameter. No token at all means an anonymous viewer. A token that is
/// present but does not verify is refused.
pub fn resolve_identity(
    service: &JwtIdentityService,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Identity, RelayError> {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token);
    let query_token = query_token.map(str::trim).filter(|token| !token.is_empty());

    let Some(token) = header_token.or(query_token) else {
        return Ok(anonymous_identity());
    };

    service.validate_viewer_token(token).map_err(|error| {
        debug!(error = %error, "viewer token rejected");
        unauthorized_error("invalid viewer token")
    })
}

pub fn anonymous_identity() -> Identity {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    Identity::anonymous(format!("Anonymous-{suffix:04}"))
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_error(message: &'static str) -> RelayError {
    RelayError::new(ErrorCode::AuthInvalidToken, message)
}
