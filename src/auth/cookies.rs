use axum_extra::extract::cookie::{Cookie, CookieJar};

use super::jwt::TokenPair;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .path("/")
        .build()
}

pub fn with_tokens(jar: CookieJar, tokens: &TokenPair) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, tokens.access_token.clone()))
        .add(session_cookie(REFRESH_COOKIE, tokens.refresh_token.clone()))
}

/// Emits expired, empty cookies so the browser drops both tokens.
pub fn without_tokens(jar: CookieJar) -> CookieJar {
    let mut access = session_cookie(ACCESS_COOKIE, String::new());
    access.make_removal();
    let mut refresh = session_cookie(REFRESH_COOKIE, String::new());
    refresh.make_removal();
    jar.add(access).add(refresh)
}

/// Non-empty cookie value, if present.
pub fn token_from(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
