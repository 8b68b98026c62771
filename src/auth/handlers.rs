use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value};
use tracing::{instrument, warn};

use super::{
    cookies::{self, REFRESH_COOKIE},
    dto::{LoginRequest, LoginResponse, RefreshRequest, RegisterForm, UpdateAccountRequest},
    extractors::CurrentUser,
    jwt::TokenPair,
    services,
};
use crate::{error::AppError, media::UploadItem, response::ApiResponse, state::AppState, users::PublicUser};

/// Two images at the per-file ceiling plus the text fields.
const REGISTER_BODY_LIMIT: usize = 12 * 1024 * 1024;

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/register",
            post(register).layer(DefaultBodyLimit::max(REGISTER_BODY_LIMIT)),
        )
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/current-user", get(current_user))
        .route("/update-account", patch(update_account))
}

fn bad_multipart(e: impl std::fmt::Display) -> AppError {
    warn!(error = %e, "multipart field unreadable");
    AppError::validation("Invalid multipart body")
}

async fn read_form(mut mp: Multipart) -> Result<RegisterForm, AppError> {
    let mut form = RegisterForm::default();
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "fullName" => form.full_name = Some(field.text().await.map_err(bad_multipart)?),
            "email" => form.email = Some(field.text().await.map_err(bad_multipart)?),
            "username" => form.username = Some(field.text().await.map_err(bad_multipart)?),
            "password" => form.password = Some(field.text().await.map_err(bad_multipart)?),
            "avatar" | "coverImage" => {
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field.bytes().await.map_err(bad_multipart)?;
                if body.is_empty() {
                    continue;
                }
                let item = UploadItem { body, content_type };
                if name == "avatar" {
                    form.avatar = Some(item);
                } else {
                    form.cover_image = Some(item);
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let form = read_form(mp?).await?;
    let user = services::register(&state, form).await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        user,
        "User registered Successfully",
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, ApiResponse<LoginResponse>), AppError> {
    let Json(payload) = payload?;
    let (user, tokens) = services::login(&state, payload).await?;
    let jar = cookies::with_tokens(jar, &tokens);
    Ok((
        jar,
        ApiResponse::ok(LoginResponse::new(user, tokens), "User logged In Successfully"),
    ))
}

#[instrument(skip(state, jar, current), fields(user_id = %current.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    current: CurrentUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<Value>), AppError> {
    services::logout(&state, current.user_id).await?;
    Ok((
        cookies::without_tokens(jar),
        ApiResponse::ok(json!({}), "User logged Out"),
    ))
}

/// Refresh token comes from the cookie, else from the JSON body.
#[instrument(skip(state, jar, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, ApiResponse<TokenPair>), AppError> {
    let incoming = cookies::token_from(&jar, REFRESH_COOKIE)
        .or_else(|| payload.and_then(|Json(body)| body.refresh_token));
    let tokens = services::refresh(&state, incoming).await?;
    let jar = cookies::with_tokens(jar, &tokens);
    Ok((jar, ApiResponse::ok(tokens, "Access token refreshed")))
}

#[instrument(skip(current), fields(user_id = %current.user_id))]
pub async fn current_user(current: CurrentUser) -> ApiResponse<PublicUser> {
    ApiResponse::ok(current.user, "User fetched successfully")
}

#[instrument(skip(state, current, payload), fields(user_id = %current.user_id))]
pub async fn update_account(
    State(state): State<AppState>,
    current: CurrentUser,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let Json(payload) = payload?;
    let user = services::update_account(&state, current.user_id, payload).await?;
    Ok(ApiResponse::ok(user, "Account details updated successfully"))
}

#[cfg(test)]
mod handler_tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, Response},
    };
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-VIDTUBE-BOUNDARY";

    fn app(state: AppState) -> Router {
        user_routes().with_state(state)
    }

    fn multipart_body(fields: &[(&str, &str)], avatar: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = avatar {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn register_request(avatar: Option<&[u8]>) -> Request<Body> {
        let fields = [
            ("fullName", "Alice"),
            ("email", "a@x.com"),
            ("username", "alice"),
            ("password", "p"),
        ];
        Request::builder()
            .method("POST")
            .uri("/register")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(&fields, avatar)))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(res: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn set_cookies(res: &Response<Body>) -> Vec<String> {
        res.headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    async fn login_alice(app: &Router) -> Response<Body> {
        app.clone()
            .oneshot(json_request(
                "POST",
                "/login",
                json!({"username": "alice", "email": "a@x.com", "password": "p"}),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_returns_201_without_secrets() {
        let app = app(AppState::fake());
        let res = app.oneshot(register_request(Some(&b"\x89PNG"[..]))).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let v = body_json(res).await;
        assert_eq!(v["statusCode"], 201);
        assert_eq!(v["data"]["username"], "alice");
        assert!(v["data"].get("password").is_none());
        assert!(v["data"].get("passwordHash").is_none());
        assert!(v["data"].get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn register_without_avatar_is_400() {
        let app = app(AppState::fake());
        let res = app.oneshot(register_request(None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["message"], "Avatar file is required");
    }

    #[tokio::test]
    async fn duplicate_register_is_409() {
        let app = app(AppState::fake());
        let first = app.clone().oneshot(register_request(Some(&b"img"[..]))).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let second = app.oneshot(register_request(Some(&b"img"[..]))).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn alice_session_lifecycle() {
        let app = app(AppState::fake());
        let res = app.clone().oneshot(register_request(Some(&b"img"[..]))).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let user_id = body_json(res).await["data"]["id"].clone();

        let res = login_alice(&app).await;
        assert_eq!(res.status(), StatusCode::OK);
        let cookies = set_cookies(&res);
        assert_eq!(cookies.len(), 2);
        for c in &cookies {
            assert!(c.contains("HttpOnly"));
            assert!(c.contains("Secure"));
        }
        assert!(cookies.iter().any(|c| c.starts_with("accessToken=")));
        assert!(cookies.iter().any(|c| c.starts_with("refreshToken=")));

        let v = body_json(res).await;
        let access = v["data"]["accessToken"].as_str().unwrap().to_string();
        let refresh = v["data"]["refreshToken"].as_str().unwrap().to_string();
        assert_eq!(v["data"]["user"]["id"], user_id);

        // Bearer header works for the session
        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/current-user")
                    .header(header::AUTHORIZATION, format!("Bearer {access}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["data"]["id"], user_id);

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .header(header::COOKIE, format!("accessToken={access}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let cleared = set_cookies(&res);
        assert!(cleared.iter().any(|c| c.starts_with("accessToken=;")));
        assert!(cleared.iter().any(|c| c.starts_with("refreshToken=;")));

        let res = app
            .oneshot(json_request(
                "POST",
                "/refresh-token",
                json!({ "refreshToken": refresh }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_reads_cookie_and_sets_new_cookies() {
        let app = app(AppState::fake());
        app.clone().oneshot(register_request(Some(&b"img"[..]))).await.unwrap();
        let v = body_json(login_alice(&app).await).await;
        let refresh = v["data"]["refreshToken"].as_str().unwrap().to_string();

        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/refresh-token")
                    .header(header::COOKIE, format!("refreshToken={refresh}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(set_cookies(&res).len(), 2);
        let v = body_json(res).await;
        assert_ne!(v["data"]["refreshToken"].as_str().unwrap(), refresh);
        assert!(v["data"]["accessToken"].is_string());
    }

    #[tokio::test]
    async fn malformed_bodies_use_the_error_envelope() {
        let app = app(AppState::fake());

        let no_content_type = Request::builder()
            .method("POST")
            .uri("/login")
            .body(Body::from("username=alice"))
            .unwrap();
        let wrong_types = json_request("POST", "/login", json!({"password": 5}));
        let not_multipart = json_request("POST", "/register", json!({"username": "alice"}));

        for req in [no_content_type, wrong_types, not_multipart] {
            let res = app.clone().oneshot(req).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            let v = body_json(res).await;
            assert_eq!(v["statusCode"], 400);
            assert_eq!(v["success"], false);
            assert!(v["errors"].is_array());
            let message = v["message"].as_str().unwrap();
            assert!(!message.contains("deserialize"), "leaked: {message}");
        }
    }

    #[tokio::test]
    async fn protected_routes_need_a_session() {
        let app = app(AppState::fake());
        let res = app
            .clone()
            .oneshot(Request::builder().uri("/current-user").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let v = body_json(res).await;
        assert_eq!(v["success"], false);

        let res = app
            .oneshot(json_request(
                "PATCH",
                "/update-account",
                json!({"fullName": "X", "email": "x@x.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn update_account_via_cookie_session() {
        let app = app(AppState::fake());
        app.clone().oneshot(register_request(Some(&b"img"[..]))).await.unwrap();
        let v = body_json(login_alice(&app).await).await;
        let access = v["data"]["accessToken"].as_str().unwrap().to_string();

        let mut req = json_request(
            "PATCH",
            "/update-account",
            json!({"fullName": "Alice Liddell", "email": "alice@wonder.land"}),
        );
        req.headers_mut().insert(
            header::COOKIE,
            format!("accessToken={access}").parse().unwrap(),
        );
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let v = body_json(res).await;
        assert_eq!(v["data"]["fullName"], "Alice Liddell");
        assert_eq!(v["data"]["email"], "alice@wonder.land");
    }
}
