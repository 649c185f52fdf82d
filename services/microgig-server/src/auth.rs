//! Authorization predicates for the three caller classes.
//!
//! - user routes: `Authorization: Bearer <user id>` - token verification
//!   is an upstream concern; the bearer value names the authenticated user
//! - admin routes: `x-admin-token` must match the configured token
//! - cron routes: `x-cron-secret` header or `?secret=` query (some
//!   schedulers can only issue plain GETs)
//!
//! Each predicate is an extractor, so a handler states its requirement in
//! its signature and unauthenticated requests never reach it.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use microgig_types::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Out-of-band credentials the server is configured with
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub admin_token: String,
    pub cron_secret: String,
}

/// The authenticated end user
pub struct AuthUser(pub UserId);

/// Proof that the caller presented the admin token
pub struct AdminAuth;

/// Proof that the caller presented the shared cron secret
pub struct CronAuth;

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let bearer = header(parts, "authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthenticated("missing bearer token"))?;
        let user = UserId::parse(bearer.trim())
            .map_err(|_| ApiError::Unauthenticated("malformed bearer token"))?;
        Ok(Self(user))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match header(parts, "x-admin-token") {
            Some(token) if token == state.auth.admin_token => Ok(Self),
            Some(_) => Err(ApiError::Unauthenticated("invalid admin token")),
            None => Err(ApiError::Unauthenticated("missing admin token")),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CronAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let from_header = header(parts, "x-cron-secret").map(str::to_string);
        let from_query = parts.uri.query().and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("secret="))
                .map(str::to_string)
        });

        match from_header.or(from_query) {
            Some(secret) if secret == state.auth.cron_secret => Ok(Self),
            Some(_) => Err(ApiError::Unauthenticated("invalid cron secret")),
            None => Err(ApiError::Unauthenticated("missing cron secret")),
        }
    }
}
