use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{error, warn};
use uuid::Uuid;

use super::cookies::{token_from, ACCESS_COOKIE};
use crate::{error::AppError, state::AppState, users::PublicUser};

/// Identity resolved from the access token, handed to protected handlers.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub user: PublicUser,
}

/// Cookie first, then `Authorization: Bearer <token>`.
pub(crate) fn access_token_from_parts(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(token) = token_from(&jar, ACCESS_COOKIE) {
        return Some(token);
    }
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn invalid_token() -> AppError {
    AppError::unauthorized("Invalid access token")
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = access_token_from_parts(parts)
            .ok_or_else(|| AppError::unauthorized("Unauthorized request"))?;

        let claims = state.jwt.verify_access(&token).map_err(|e| {
            warn!(error = %e, "access token rejected");
            invalid_token()
        })?;

        let user = match state.users.find_public_by_id(claims.sub).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                warn!(user_id = %claims.sub, "access token for missing user");
                return Err(invalid_token());
            }
            Err(e) => {
                error!(error = %e, user_id = %claims.sub, "user lookup failed during auth");
                return Err(invalid_token());
            }
        };

        Ok(CurrentUser {
            user_id: user.id,
            user,
        })
    }
}
