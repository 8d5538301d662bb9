//! Signed, expiring session tokens carrying the caller's identity.

use crate::auth::{Identity, Role};
use crate::error::{AppError, AppResult};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    class: Option<String>,
    iat: i64,
    exp: i64,
}

pub trait SessionTokens {
    fn issue(&self, who: &Identity) -> AppResult<String>;
    fn verify(&self, token: &str) -> AppResult<Identity>;
}

pub struct JwtSessions {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl JwtSessions {
    pub fn new(secret: &[u8], ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs: ttl_hours * 3600,
        }
    }

    fn issue_at(&self, who: &Identity, now: i64) -> AppResult<String> {
        let claims = Claims {
            sub: who.user_id.clone(),
            username: who.username.clone(),
            role: who.role,
            class: who.assigned_class.clone(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(e.into()))
    }
}

impl SessionTokens for JwtSessions {
    fn issue(&self, who: &Identity) -> AppResult<String> {
        self.issue_at(who, chrono::Utc::now().timestamp())
    }

    fn verify(&self, token: &str) -> AppResult<Identity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AppError::Authentication("session expired".to_string())
                }
                _ => AppError::Authentication("invalid session token".to_string()),
            }
        })?;
        let c = data.claims;
        Ok(Identity {
            user_id: c.sub,
            username: c.username,
            role: c.role,
            assigned_class: c.class,
        })
    }
}

/// Pulls the token out of either a bare token or an `Authorization` header value.
pub fn bearer_token(raw: Option<&str>) -> AppResult<&str> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(AppError::Authentication("missing session token".to_string()));
    };
    let token = match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => raw,
    };
    if token.is_empty() {
        return Err(AppError::Authentication("missing session token".to_string()));
    }
    Ok(token)
}
