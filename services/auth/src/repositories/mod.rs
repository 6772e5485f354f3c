//! Persistence seams for users and refresh tokens
//!
//! PostgreSQL repositories back the running service; the in-memory stores
//! mirror their conditional-update semantics for tests and embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use uuid::Uuid;

use crate::models::{NewRefreshToken, NewUser, RefreshToken, RevocationReason, User};

pub mod memory;
pub mod refresh_token;
pub mod user;

pub use memory::{MemoryRefreshTokenStore, MemoryUserStore};
pub use refresh_token::RefreshTokenRepository;
pub use user::UserRepository;

/// User lookups needed by the credential store
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. A taken email fails with `DatabaseError::Duplicate`.
    async fn create(&self, new_user: &NewUser) -> DatabaseResult<User>;

    async fn find_by_email(&self, email: &str) -> DatabaseResult<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>>;
}

/// Durable refresh token state.
///
/// Every mutation is a conditional update that only touches rows whose
/// `revoked_at` is still null; the returned count tells the caller whether it
/// won the transition.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: &NewRefreshToken) -> DatabaseResult<RefreshToken>;

    async fn find_by_hash(&self, token_hash: &str) -> DatabaseResult<Option<RefreshToken>>;

    /// Mark one row revoked if it is not already
    async fn revoke(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> DatabaseResult<u64>;

    /// Mark every unrevoked row of a user revoked
    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> DatabaseResult<u64>;

    /// Mark every unrevoked row with `expires_at <= at` revoked as expired
    async fn revoke_expired(&self, at: DateTime<Utc>) -> DatabaseResult<u64>;

    /// Unrevoked, unexpired rows of a user, newest first
    async fn list_active(&self, user_id: Uuid, at: DateTime<Utc>)
    -> DatabaseResult<Vec<RefreshToken>>;
}
