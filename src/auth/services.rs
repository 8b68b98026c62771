use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{LoginRequest, RegisterForm, UpdateAccountRequest};
use super::jwt::{TokenError, TokenPair};
use super::password::{hash_password, password_matches};
use crate::{
    error::AppError,
    media::{discard, upload_optional, upload_required, AVATAR_FOLDER, COVER_FOLDER},
    state::AppState,
    users::{NewUser, PublicUser},
};

const TOKEN_FAILURE: &str = "Something went wrong while generating refresh and access token";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn checked_email(email: String) -> Result<String, AppError> {
    let email = email.to_lowercase();
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }
    Ok(email)
}

/// Reloads the user, mints a pair and stores the refresh token, replacing the old one.
/// Every failure here is reported as the same internal error.
pub async fn issue_tokens(state: &AppState, user_id: Uuid) -> Result<TokenPair, AppError> {
    let user = state
        .users
        .find_by_id(user_id)
        .await
        .map_err(|e| AppError::internal(TOKEN_FAILURE, e))?
        .ok_or_else(|| AppError::internal(TOKEN_FAILURE, format!("user {} not found", user_id)))?;

    let tokens = state
        .jwt
        .issue_pair(&user)
        .map_err(|e| AppError::internal(TOKEN_FAILURE, e))?;

    state
        .users
        .set_refresh_token(user.id, &tokens.refresh_token)
        .await
        .map_err(|e| AppError::internal(TOKEN_FAILURE, e))?;

    Ok(tokens)
}

pub async fn register(state: &AppState, form: RegisterForm) -> Result<PublicUser, AppError> {
    let RegisterForm {
        full_name,
        email,
        username,
        password,
        avatar,
        cover_image,
    } = form;

    let password = password.filter(|p| !p.trim().is_empty());
    let (Some(full_name), Some(email), Some(username), Some(password)) =
        (trimmed(full_name), trimmed(email), trimmed(username), password)
    else {
        return Err(AppError::validation("All fields are required"));
    };
    let username = username.to_lowercase();
    let email = checked_email(email)?;

    if state
        .users
        .find_by_username_or_email(Some(&username), Some(&email))
        .await?
        .is_some()
    {
        warn!(%username, %email, "registration for existing user");
        return Err(AppError::Conflict(
            "User with email or username already exists".into(),
        ));
    }

    let password_hash = hash_password(&password)
        .map_err(|e| AppError::internal("Something went wrong while registering the user", e))?;

    let avatar = upload_required(
        state.media.as_ref(),
        AVATAR_FOLDER,
        avatar,
        "Avatar file is required",
    )
    .await?;
    let cover_image = upload_optional(state.media.as_ref(), COVER_FOLDER, cover_image).await;

    let created = state
        .users
        .create(NewUser {
            username,
            email,
            full_name,
            password_hash,
            avatar: avatar.clone(),
            cover_image: cover_image.clone(),
        })
        .await;
    let user = match created {
        Ok(user) => user,
        Err(e) => {
            let media = state.media.as_ref();
            discard(media, &avatar).await;
            if let Some(cover) = &cover_image {
                discard(media, cover).await;
            }
            return Err(e.into());
        }
    };

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(PublicUser::from(user))
}

pub async fn login(
    state: &AppState,
    req: LoginRequest,
) -> Result<(PublicUser, TokenPair), AppError> {
    let username = trimmed(req.username).map(|u| u.to_lowercase());
    let email = trimmed(req.email).map(|e| e.to_lowercase());
    if username.is_none() && email.is_none() {
        return Err(AppError::validation("username or email is required"));
    }
    let password = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::validation("Password is required"))?;

    let user = state
        .users
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| AppError::NotFound("User does not exist".into()))?;

    if !password_matches(&password, &user.password_hash) {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized("Invalid user credentials"));
    }

    let tokens = issue_tokens(state, user.id).await?;
    info!(user_id = %user.id, "user logged in");
    Ok((PublicUser::from(user), tokens))
}

pub async fn logout(state: &AppState, user_id: Uuid) -> Result<(), AppError> {
    state.users.clear_refresh_token(user_id).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

/// Rotates the pair. The presented token must verify and equal the stored one.
///
/// Verify-then-overwrite is not atomic: two concurrent refreshes with the same
/// token can both pass the comparison before either write lands.
pub async fn refresh(state: &AppState, incoming: Option<String>) -> Result<TokenPair, AppError> {
    let incoming = trimmed(incoming).ok_or_else(|| AppError::unauthorized("Unauthorized request"))?;

    let claims = state.jwt.verify_refresh(&incoming).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        match e {
            TokenError::Expired => AppError::unauthorized("Refresh token is expired"),
            TokenError::Invalid | TokenError::WrongKind => {
                AppError::unauthorized("Invalid refresh token")
            }
        }
    })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid refresh token"))?;

    if user.refresh_token.as_deref() != Some(incoming.as_str()) {
        warn!(user_id = %user.id, "stale or reused refresh token");
        return Err(AppError::unauthorized("Refresh token is expired or used"));
    }

    let tokens = issue_tokens(state, user.id).await?;
    info!(user_id = %user.id, "tokens rotated");
    Ok(tokens)
}

pub async fn update_account(
    state: &AppState,
    user_id: Uuid,
    req: UpdateAccountRequest,
) -> Result<PublicUser, AppError> {
    let (Some(full_name), Some(email)) = (trimmed(req.full_name), trimmed(req.email)) else {
        return Err(AppError::validation("All fields are required"));
    };
    let email = checked_email(email)?;

    let user = state
        .users
        .update_account(user_id, &full_name, &email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!(%user_id, "account details updated");
    Ok(user)
}
