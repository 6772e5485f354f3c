//! Authentication service routes

use axum::{
    Extension, Form, Json, Router,
    extract::{Path, State, rejection::FormRejection},
    http::{StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{sensitive_headers::SetSensitiveHeadersLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    AppState,
    error::AuthError,
    middleware::{AuthUser, auth_middleware, ensure_same_user},
    validation::{normalize_email, validate_email, validate_handle, validate_password},
};

/// Form for user registration
#[derive(Deserialize, Default)]
pub struct RegisterForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub password: String,
}

/// Form for user login
#[derive(Deserialize, Default)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Form carrying a refresh token
#[derive(Deserialize, Default)]
pub struct RefreshTokenForm {
    #[serde(default)]
    pub refresh_token: String,
}

/// Public view of a user
#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

/// Response for user login
#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: UserResponse,
}

/// Response for token refresh
#[derive(Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// Response for session listing; never carries token digests
#[derive(Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A body that cannot be read as a form counts as a form with every field
/// empty, so the handler reports the missing field
fn form_fields<T: Default>(form: Result<Form<T>, FormRejection>) -> T {
    match form {
        Ok(Form(fields)) => fields,
        Err(rejection) => {
            debug!("Unreadable form body: {}", rejection);
            T::default()
        }
    }
}

/// Create the router for the authentication service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/logout-all", post(logout_all))
        .route("/me", get(me))
        .route("/users/:id/sessions", get(list_sessions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "auth-service"
    }))
}

/// User registration endpoint
pub async fn register(
    State(state): State<AppState>,
    form: Result<Form<RegisterForm>, FormRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let form = form_fields(form);
    let email = normalize_email(&form.email);
    let handle = form.handle.trim();
    if email.is_empty() {
        return Err(AuthError::MissingField("email"));
    }
    if handle.is_empty() {
        return Err(AuthError::MissingField("handle"));
    }
    if form.password.is_empty() {
        return Err(AuthError::MissingField("password"));
    }

    validate_email(&email).map_err(AuthError::Validation)?;
    validate_handle(handle).map_err(AuthError::Validation)?;
    validate_password(&form.password).map_err(AuthError::Validation)?;

    let user = state
        .credentials
        .register(&email, handle, &form.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": user.id,
            "email": user.email,
            "handle": user.handle,
        })),
    ))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let form = form_fields(form);
    let key = normalize_email(&form.email);
    if !key.is_empty() && !state.rate_limiter.is_allowed(&key).await {
        warn!("Login throttled");
        return Err(AuthError::TooManyAttempts);
    }

    let outcome = state.sessions.login(&form.email, &form.password).await?;
    state.rate_limiter.reset(&key).await;

    Ok(Json(LoginResponse {
        access_token: outcome.tokens.access_token,
        refresh_token: outcome.tokens.refresh_token,
        token_type: "Bearer",
        expires_in: state.jwt_service.access_token_expiry(),
        user: UserResponse {
            id: outcome.user.id,
            email: outcome.user.email,
            role: outcome.user.role,
        },
    }))
}

/// Refresh token endpoint; rotates the refresh token on every call
pub async fn refresh(
    State(state): State<AppState>,
    form: Result<Form<RefreshTokenForm>, FormRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let form = form_fields(form);
    let tokens = state.sessions.refresh(&form.refresh_token).await?;

    Ok(Json(RefreshResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: "Bearer",
        expires_in: state.jwt_service.access_token_expiry(),
    }))
}

/// Logout endpoint
pub async fn logout(
    State(state): State<AppState>,
    form: Result<Form<RefreshTokenForm>, FormRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let form = form_fields(form);
    state.sessions.logout(&form.refresh_token).await?;

    Ok(Json(serde_json::json!({"message": "Logged out"})))
}

/// Logout from every device; the user comes from the verified access token
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AuthError> {
    let revoked = state.sessions.logout_all(user.id).await?;
    info!(user_id = %user.id, revoked, "Logged out of all sessions");

    Ok(Json(serde_json::json!({
        "message": "Logged out of all sessions",
        "revoked": revoked,
    })))
}

/// Identity of the caller
pub async fn me(Extension(user): Extension<AuthUser>) -> impl IntoResponse {
    Json(user)
}

/// Active sessions of a user; callers may only list their own
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AuthError> {
    ensure_same_user(&user, user_id)?;

    let sessions: Vec<SessionResponse> = state
        .sessions
        .active_sessions(user_id)
        .await?
        .into_iter()
        .map(|row| SessionResponse {
            id: row.id,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
        .collect();

    Ok(Json(sessions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        jwt::JwtConfig,
        ledger::RefreshTokenConfig,
        rate_limiter::RateLimiterConfig,
        repositories::{MemoryUserStore, memory::FailingRefreshTokenStore},
    };
    use std::sync::Arc;
    use axum::{
        body::Body,
        http::{Method, Request, Response},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn state(max_attempts: u32) -> AppState {
        AppState::in_memory(
            JwtConfig {
                secret: "routes-test-secret-0123456789abcdef".to_string(),
                issuer: "auth-test".to_string(),
                access_token_expiry: 86_400,
            },
            RefreshTokenConfig::default(),
            RateLimiterConfig {
                max_attempts,
                window_seconds: 300,
                ban_duration_seconds: 300,
            },
        )
        .unwrap()
    }

    async fn send(
        app: &Router,
        method: Method,
        path: &str,
        form: Option<&str>,
        bearer: Option<&str>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        if form.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        }
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        app.clone()
            .oneshot(
                builder
                    .body(Body::from(form.unwrap_or_default().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json(response: Response<Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register_and_login(app: &Router) -> Value {
        let response = send(
            app,
            Method::POST,
            "/users",
            Some("email=a%40x.test&handle=alice&password=Secret1"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send(
            app,
            Method::POST,
            "/login",
            Some("email=a%40x.test&password=Secret1"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        json(response).await
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(state(5));
        let response = send(&app, Method::GET, "/health", None, None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_login_missing_fields() {
        let app = create_router(state(5));
        let response = send(&app, Method::POST, "/login", Some("email=a%40x.test"), None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["code"], "missing_field");
    }

    #[tokio::test]
    async fn test_login_invalid_credentials() {
        let app = create_router(state(5));
        register_and_login(&app).await;

        let response = send(
            &app,
            Method::POST,
            "/login",
            Some("email=a%40x.test&password=Wrong12"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(response).await["error"], "invalid credentials");
    }

    #[tokio::test]
    async fn test_login_is_throttled() {
        let app = create_router(state(2));
        for _ in 0..2 {
            let response = send(
                &app,
                Method::POST,
                "/login",
                Some("email=b%40x.test&password=Wrong12"),
                None,
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = send(
            &app,
            Method::POST,
            "/login",
            Some("email=b%40x.test&password=Wrong12"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let app = create_router(state(5));
        let response = send(
            &app,
            Method::POST,
            "/users",
            Some("email=nope&handle=alice&password=Secret1"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        register_and_login(&app).await;
        let response = send(
            &app,
            Method::POST,
            "/users",
            Some("email=A%40X.test&handle=other&password=Secret1"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["code"], "email_taken");
    }

    #[tokio::test]
    async fn test_refresh_rotation_and_logout() {
        let app = create_router(state(5));
        let login = register_and_login(&app).await;
        let r1 = login["refresh_token"].as_str().unwrap().to_string();
        assert_eq!(login["token_type"], "Bearer");
        assert_eq!(login["expires_in"], 86_400);
        assert_eq!(login["user"]["email"], "a@x.test");

        let response = send(
            &app,
            Method::POST,
            "/refresh",
            Some(&format!("refresh_token={}", r1)),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let r2 = json(response).await["refresh_token"]
            .as_str()
            .unwrap()
            .to_string();

        let response = send(
            &app,
            Method::POST,
            "/refresh",
            Some(&format!("refresh_token={}", r1)),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(response).await["code"], "refresh_token_revoked");

        let response = send(
            &app,
            Method::POST,
            "/logout",
            Some(&format!("refresh_token={}", r2)),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["message"], "Logged out");

        let response = send(
            &app,
            Method::POST,
            "/logout",
            Some(&format!("refresh_token={}", r2)),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(response).await["code"], "invalid_refresh_token");
    }

    #[tokio::test]
    async fn test_refresh_missing_token() {
        let app = create_router(state(5));
        let response = send(&app, Method::POST, "/refresh", Some(""), None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_form_endpoints_without_content_type() {
        let app = create_router(state(5));

        for (path, field) in [
            ("/users", "email required"),
            ("/login", "email required"),
            ("/refresh", "refresh_token required"),
            ("/logout", "refresh_token required"),
        ] {
            // No form body means no Content-Type header either
            let response = send(&app, Method::POST, path, None, None).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path}");

            let body = json(response).await;
            assert_eq!(body["code"], "missing_field", "{path}");
            assert_eq!(body["error"], field, "{path}");
        }

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/refresh")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"refresh_token":"abc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["code"], "missing_field");
    }

    #[tokio::test]
    async fn test_storage_failure_is_a_generic_500() {
        let state = AppState::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(FailingRefreshTokenStore {
                fail_lookup: true,
                ..Default::default()
            }),
            JwtConfig {
                secret: "routes-test-secret-0123456789abcdef".to_string(),
                issuer: "auth-test".to_string(),
                access_token_expiry: 86_400,
            },
            RefreshTokenConfig::default(),
            RateLimiterConfig::default(),
        )
        .unwrap();
        let app = create_router(state);

        for path in ["/refresh", "/logout"] {
            let response =
                send(&app, Method::POST, path, Some("refresh_token=abc"), None).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{path}");

            let body = json(response).await;
            assert_eq!(
                body,
                serde_json::json!({"error": "Internal server error", "code": "internal"})
            );
        }
    }

    #[tokio::test]
    async fn test_protected_routes_require_bearer() {
        let app = create_router(state(5));

        let response = send(&app, Method::GET, "/me", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(response).await["code"], "missing_token");

        let response = send(&app, Method::POST, "/logout-all", None, Some("garbage")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(response).await["code"], "token_malformed");
    }

    #[tokio::test]
    async fn test_me_and_session_listing() {
        let app = create_router(state(5));
        let login = register_and_login(&app).await;
        let access = login["access_token"].as_str().unwrap();
        let user_id = login["user"]["id"].as_str().unwrap();

        let response = send(&app, Method::GET, "/me", None, Some(access)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["id"], user_id);

        let response = send(
            &app,
            Method::GET,
            &format!("/users/{}/sessions", user_id),
            None,
            Some(access),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let sessions = json(response).await;
        assert_eq!(sessions.as_array().unwrap().len(), 1);
        assert!(sessions[0].get("token_hash").is_none());

        let response = send(
            &app,
            Method::GET,
            &format!("/users/{}/sessions", Uuid::new_v4()),
            None,
            Some(access),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_logout_all() {
        let app = create_router(state(5));
        let login = register_and_login(&app).await;
        let access = login["access_token"].as_str().unwrap();
        let refresh = login["refresh_token"].as_str().unwrap();

        let response = send(&app, Method::POST, "/logout-all", None, Some(access)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["revoked"], 1);

        let response = send(&app, Method::POST, "/logout-all", None, Some(access)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["revoked"], 0);

        let response = send(
            &app,
            Method::POST,
            "/refresh",
            Some(&format!("refresh_token={}", refresh)),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
