use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use livechat_common::types::Role;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::chat::session::Identity;

pub const VIEWER_TOKEN_TTL_SECONDS: i64 = 60 * 60;

const MAX_DISPLAY_NAME_CHARS: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ViewerTokenClaims {
    sub: String,
    name: String,
    #[serde(default)]
    role: Option<String>,
    iat: i64,
    exp: i64,
}

/// Verifies viewer tokens minted by the platform's auth service.
#[derive(Clone)]
pub struct JwtIdentityService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_viewer_token(
        &self,
        user_id: Uuid,
        name: &str,
        role: Role,
    ) -> anyhow::Result<String> {
        self.issue_viewer_token_at(user_id, name, role, current_unix_timestamp()?)
    }

    fn issue_viewer_token_at(
        &self,
        user_id: Uuid,
        name: &str,
        role: Role,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = ViewerTokenClaims {
            sub: user_id.to_string(),
            name: name.to_string(),
            role: Some(role.as_str().to_string()),
            iat: issued_at,
            exp: issued_at + VIEWER_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode viewer token")
    }

    /// Resolve the identity a token vouches for.
    ///
    /// A missing or unknown role claim means `viewer`. Tokens never grant
    /// the anonymous role.
    pub fn validate_viewer_token(&self, token: &str) -> anyhow::Result<Identity> {
        let claims = decode::<ViewerTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode viewer token")?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("viewer token subject '{}' is not a UUID", claims.sub))?;

        let name: String = claims.name.trim().chars().take(MAX_DISPLAY_NAME_CHARS).collect();
        if name.is_empty() {
            bail!("viewer token carries an empty display name");
        }

        let role = match claims.role.as_deref().and_then(Role::from_claim) {
            Some(Role::Anonymous) | None => Role::Viewer,
            Some(role) => role,
        };

        Ok(Identity::authenticated(user_id, name, role))
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
