//! Client against the real auth router with in-memory stores

use auth::{
    AppState, create_router, jwt::JwtConfig, ledger::RefreshTokenConfig,
    rate_limiter::RateLimiterConfig,
};
use serde_json::Value;
use session_client::{FileStorage, MemoryStorage, RefreshTokenStorage, SessionClient};
use std::sync::Arc;
use std::time::Duration;

/// Access tokens live one second so tests can outlive them
async fn spawn_auth() -> String {
    let state = AppState::in_memory(
        JwtConfig {
            secret: "client-e2e-secret-0123456789abcdef".to_string(),
            issuer: "auth-test".to_string(),
            access_token_expiry: 1,
        },
        RefreshTokenConfig::default(),
        RateLimiterConfig::default(),
    )
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });

    format!("http://{}", addr)
}

async fn register(client: &SessionClient) {
    let response = client
        .execute(client.post("/users").unwrap().form(&[
            ("email", "a@x.test"),
            ("handle", "alice"),
            ("password", "Secret1"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
}

async fn outlive_access_token() {
    tokio::time::sleep(Duration::from_millis(2100)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_lifecycle() {
    let base = spawn_auth().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path().join("refresh-token")));
    let client = SessionClient::new(&base, storage.clone()).unwrap();
    register(&client).await;

    let login = client.login("a@x.test", "Secret1").await.unwrap();
    assert_eq!(login.user.email, "a@x.test");
    assert_eq!(login.tokens.token_type.as_deref(), Some("Bearer"));
    let first_refresh = storage.load().unwrap().unwrap();
    assert_eq!(first_refresh, login.tokens.refresh_token);

    // Expired access token is refreshed transparently
    outlive_access_token().await;
    let me: Value = client.get_json("/me").await.unwrap();
    assert_eq!(me["email"], "a@x.test");
    assert_ne!(client.access_token().as_deref(), Some(login.tokens.access_token.as_str()));
    let rotated = storage.load().unwrap().unwrap();
    assert_ne!(rotated, first_refresh);

    // A burst of requests rotates the refresh token once; a second rotation
    // would have presented a revoked token and ended the session
    outlive_access_token().await;
    let mut handles = Vec::new();
    for _ in 0..6 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.get_json::<Value>("/me").await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap()["email"], "a@x.test");
    }
    assert_ne!(storage.load().unwrap().unwrap(), rotated);

    let sessions: Vec<Value> = client
        .get_json(&format!("/users/{}/sessions", login.user.id))
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);

    client.logout().await.unwrap();
    assert!(!client.has_session().unwrap());
    assert_eq!(client.access_token(), None);

    let err = client.get_json::<Value>("/me").await.unwrap_err();
    assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
    assert_eq!(err.code(), Some("missing_token"));
}

#[tokio::test]
async fn test_logout_all_ends_other_sessions() {
    let base = spawn_auth().await;
    let laptop = SessionClient::new(&base, Arc::new(MemoryStorage::new())).unwrap();
    let phone_storage = Arc::new(MemoryStorage::new());
    let phone = SessionClient::new(&base, phone_storage.clone()).unwrap();
    register(&laptop).await;

    laptop.login("a@x.test", "Secret1").await.unwrap();
    phone.login("a@x.test", "Secret1").await.unwrap();

    assert_eq!(laptop.logout_all().await.unwrap(), 2);
    assert!(!laptop.has_session().unwrap());

    // The phone's refresh token was revoked server side
    outlive_access_token().await;
    let err = phone.get_json::<Value>("/me").await.unwrap_err();
    assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
    assert!(!phone.has_session().unwrap());
    assert_eq!(phone_storage.load().unwrap(), None);
}

#[tokio::test]
async fn test_login_failure_is_reported() {
    let base = spawn_auth().await;
    let client = SessionClient::new(&base, Arc::new(MemoryStorage::new())).unwrap();
    register(&client).await;

    let err = client.login("a@x.test", "wrong1").await.unwrap_err();
    assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
    assert_eq!(err.code(), Some("invalid_credentials"));
    assert!(!client.has_session().unwrap());
}
