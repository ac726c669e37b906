//! Bearer authentication and the access guard
//!
//! `auth_middleware` resolves an optional `Authorization: Bearer` JWT (HS256)
//! to an [`AuthUser`], then evaluates [`crate::access::evaluate`] for the
//! requested path before the handler runs.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::state::AppState;
use super::types::ApiError;
use crate::access::{AccessContext, GeoLocation, Role, RouteClass, evaluate};
use crate::config::AuthConfig;
use crate::core_types::UserId;

pub const API_PREFIX: &str = "/api/v1";
pub const GEO_HEADER: &str = "x-geo-location";

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// user_id as string
    pub sub: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

fn default_role() -> Role {
    Role::User
}

/// Caller identity injected into request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

impl AuthUser {
    /// Actor name recorded on admin decisions
    pub fn actor(&self) -> String {
        format!("admin:{}", self.user_id)
    }
}

/// Verifies tokens issued by the identity service
pub struct JwtAuth {
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_secs;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, ApiError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;
        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::unauthorized("Invalid user ID in token"))?;
        Ok(AuthUser {
            user_id,
            role: data.claims.role,
        })
    }
}

fn bearer(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid Authorization header"))?;
    value
        .strip_prefix("Bearer ")
        .map(Some)
        .ok_or_else(|| ApiError::unauthorized("Invalid token format"))
}

fn location(headers: &HeaderMap) -> Option<GeoLocation> {
    headers
        .get(GEO_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(GeoLocation::parse)
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = match bearer(request.headers())? {
        Some(token) => Some(state.auth.verify(token)?),
        None => None,
    };

    let path = request.uri().path();
    let route = RouteClass::of_path(path.strip_prefix(API_PREFIX).unwrap_or(path));
    let ctx = AccessContext {
        user_id: user.map(|u| u.user_id),
        role: user.map(|u| u.role),
        route,
        location: location(request.headers()),
    };
    if let Err(e) = evaluate(&ctx, &state.access).into_result() {
        tracing::warn!(path, user_id = ?ctx.user_id, error = %e, "Access denied");
        return Err(e.into());
    }

    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "0123456789abcdef0123";

    fn sign(secret: &str, user_id: UserId, role: Role, ttl_secs: i64, iss: Option<&str>) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            exp: (now + ttl_secs) as usize,
            iat: now as usize,
            iss: iss.map(str::to_string),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn auth(issuer: Option<&str>) -> JwtAuth {
        JwtAuth::new(&AuthConfig {
            jwt_secret: SECRET.into(),
            issuer: issuer.map(str::to_string),
            leeway_secs: 0,
        })
    }

    #[test]
    fn test_signed_token_verifies() {
        let auth = auth(Some("wallet"));
        let token = sign(SECRET, 42, Role::Admin, 60, Some("wallet"));
        let user = auth.verify(&token).unwrap();
        assert_eq!(user, AuthUser { user_id: 42, role: Role::Admin });

        let foreign = sign(SECRET, 42, Role::Admin, 60, Some("elsewhere"));
        assert!(auth.verify(&foreign).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = auth(None);
        let token = sign(SECRET, 42, Role::User, -120, None);
        assert!(auth.verify(&token).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(SECRET, 1, Role::User, 60, None);
        let other = JwtAuth::new(&AuthConfig {
            jwt_secret: "another-secret-entirely".into(),
            issuer: None,
            leeway_secs: 0,
        });
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn test_bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer(&headers).unwrap().is_none());
        headers.insert(header::AUTHORIZATION, "Token abc".parse().unwrap());
        assert!(bearer(&headers).is_err());
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer(&headers).unwrap(), Some("abc"));
    }
}
