//! In-process stores with the same semantics as the PostgreSQL repositories
//!
//! Each conditional update runs under a single write lock, which gives the
//! same one-winner guarantee the `WHERE revoked_at IS NULL` clause gives in
//! PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RefreshTokenStore, UserStore};
use crate::models::{
    NewRefreshToken, NewUser, RefreshToken, RevocationReason, User, user::DEFAULT_ROLE,
};

#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new_user: &NewUser) -> DatabaseResult<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == new_user.email) {
            return Err(DatabaseError::Duplicate("users_email_key".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email.clone(),
            handle: new_user.handle.clone(),
            password_hash: new_user.password_hash.clone(),
            role: DEFAULT_ROLE.to_string(),
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> DatabaseResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct MemoryRefreshTokenStore {
    rows: Arc<RwLock<HashMap<Uuid, RefreshToken>>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row ever written, revoked ones included
    pub async fn all(&self) -> Vec<RefreshToken> {
        self.rows.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn insert(&self, token: &NewRefreshToken) -> DatabaseResult<RefreshToken> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|r| r.token_hash == token.token_hash) {
            return Err(DatabaseError::Duplicate(
                "refresh_tokens_token_hash_key".to_string(),
            ));
        }

        let row = RefreshToken {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token_hash: token.token_hash.clone(),
            expires_at: token.expires_at,
            revoked_at: None,
            revoked_reason: None,
            created_at: Utc::now(),
        };
        rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_hash(&self, token_hash: &str) -> DatabaseResult<Option<RefreshToken>> {
        let rows = self.rows.read().await;
        Ok(rows.values().find(|r| r.token_hash == token_hash).cloned())
    }

    async fn revoke(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> DatabaseResult<u64> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(row) if row.revoked_at.is_none() => {
                mark_revoked(row, at, reason);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> DatabaseResult<u64> {
        let mut rows = self.rows.write().await;
        let mut affected = 0;
        for row in rows
            .values_mut()
            .filter(|r| r.user_id == user_id && r.revoked_at.is_none())
        {
            mark_revoked(row, at, reason);
            affected += 1;
        }
        Ok(affected)
    }

    async fn revoke_expired(&self, at: DateTime<Utc>) -> DatabaseResult<u64> {
        let mut rows = self.rows.write().await;
        let mut affected = 0;
        for row in rows
            .values_mut()
            .filter(|r| r.revoked_at.is_none() && r.expires_at <= at)
        {
            mark_revoked(row, at, RevocationReason::Expired);
            affected += 1;
        }
        Ok(affected)
    }

    async fn list_active(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> DatabaseResult<Vec<RefreshToken>> {
        let rows = self.rows.read().await;
        let mut active: Vec<RefreshToken> = rows
            .values()
            .filter(|r| r.user_id == user_id && r.revoked_at.is_none() && r.expires_at > at)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }
}

/// Memory store whose selected operations fail like an unreachable database
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct FailingRefreshTokenStore {
    pub inner: MemoryRefreshTokenStore,
    pub fail_lookup: bool,
    pub fail_revoke: bool,
}

#[cfg(test)]
impl FailingRefreshTokenStore {
    fn check(&self, fail: bool) -> DatabaseResult<()> {
        if fail {
            Err(DatabaseError::Query(sqlx::Error::Protocol(
                "connection reset by db-primary.internal:5432".to_string(),
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[async_trait]
impl RefreshTokenStore for FailingRefreshTokenStore {
    async fn insert(&self, token: &NewRefreshToken) -> DatabaseResult<RefreshToken> {
        self.inner.insert(token).await
    }

    async fn find_by_hash(&self, token_hash: &str) -> DatabaseResult<Option<RefreshToken>> {
        self.check(self.fail_lookup)?;
        self.inner.find_by_hash(token_hash).await
    }

    async fn revoke(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> DatabaseResult<u64> {
        self.check(self.fail_revoke)?;
        self.inner.revoke(id, at, reason).await
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> DatabaseResult<u64> {
        self.check(self.fail_revoke)?;
        self.inner.revoke_all_for_user(user_id, at, reason).await
    }

    async fn revoke_expired(&self, at: DateTime<Utc>) -> DatabaseResult<u64> {
        self.check(self.fail_revoke)?;
        self.inner.revoke_expired(at).await
    }

    async fn list_active(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> DatabaseResult<Vec<RefreshToken>> {
        self.check(self.fail_lookup)?;
        self.inner.list_active(user_id, at).await
    }
}

fn mark_revoked(row: &mut RefreshToken, at: DateTime<Utc>, reason: RevocationReason) {
    row.revoked_at = Some(at);
    row.revoked_reason = Some(reason.as_str().to_string());
}
