//! Credential and session-lifecycle service
//!
//! Password verification, short-lived signed access tokens, rotating refresh
//! tokens persisted as one-way hashes, and single/all-session revocation.

pub mod credentials;
pub mod database;
pub mod error;
pub mod jwt;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod rate_limiter;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod validation;

use sqlx::PgPool;
use std::sync::Arc;

use crate::{
    credentials::CredentialStore,
    error::AuthResult,
    jwt::{JwtConfig, JwtService},
    ledger::{RefreshLedger, RefreshTokenConfig},
    rate_limiter::{RateLimiter, RateLimiterConfig},
    repositories::{
        MemoryRefreshTokenStore, MemoryUserStore, RefreshTokenRepository, RefreshTokenStore,
        UserRepository, UserStore,
    },
    session::SessionService,
};

pub use routes::create_router;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub jwt_service: JwtService,
    pub credentials: CredentialStore,
    pub sessions: SessionService,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wire the service over arbitrary user and refresh token stores
    pub fn new(
        users: Arc<dyn UserStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        jwt_config: JwtConfig,
        refresh_config: RefreshTokenConfig,
        rate_limiter_config: RateLimiterConfig,
    ) -> AuthResult<Self> {
        let jwt_service = JwtService::new(jwt_config);
        let credentials = CredentialStore::new(users)?;
        let ledger = RefreshLedger::new(refresh_tokens, refresh_config.ttl);
        let sessions = SessionService::new(
            credentials.clone(),
            jwt_service.clone(),
            ledger,
            refresh_config.reuse_policy,
        );

        Ok(Self {
            jwt_service,
            credentials,
            sessions,
            rate_limiter: RateLimiter::new(rate_limiter_config),
        })
    }

    /// State backed by the PostgreSQL repositories
    pub fn postgres(
        pool: PgPool,
        jwt_config: JwtConfig,
        refresh_config: RefreshTokenConfig,
        rate_limiter_config: RateLimiterConfig,
    ) -> AuthResult<Self> {
        Self::new(
            Arc::new(UserRepository::new(pool.clone())),
            Arc::new(RefreshTokenRepository::new(pool)),
            jwt_config,
            refresh_config,
            rate_limiter_config,
        )
    }

    /// State backed by process-local stores; nothing survives a restart
    pub fn in_memory(
        jwt_config: JwtConfig,
        refresh_config: RefreshTokenConfig,
        rate_limiter_config: RateLimiterConfig,
    ) -> AuthResult<Self> {
        Self::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryRefreshTokenStore::new()),
            jwt_config,
            refresh_config,
            rate_limiter_config,
        )
    }
}
