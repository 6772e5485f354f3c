//! Refresh ledger: opaque refresh tokens persisted only as SHA-256 digests

use anyhow::Result;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::AuthResult,
    models::{NewRefreshToken, RefreshToken, RevocationReason},
    repositories::RefreshTokenStore,
};

/// Bytes of randomness in a refresh token plaintext
const TOKEN_BYTES: usize = 32;

/// What to do when an already revoked refresh token is presented again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReusePolicy {
    /// Fail the call and log it
    #[default]
    Reject,
    /// Fail the call and revoke every session of the token's owner
    RevokeAll,
}

impl ReusePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(ReusePolicy::Reject),
            "revoke_all" | "revoke-all" => Some(ReusePolicy::RevokeAll),
            _ => None,
        }
    }
}

/// Refresh token configuration
#[derive(Debug, Clone)]
pub struct RefreshTokenConfig {
    /// Lifetime of a freshly issued refresh token
    pub ttl: Duration,
    pub reuse_policy: ReusePolicy,
    /// Seconds between expired-row sweeps, `0` disables the sweeper
    pub sweep_interval_secs: u64,
}

impl Default for RefreshTokenConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::days(30),
            reuse_policy: ReusePolicy::Reject,
            sweep_interval_secs: 3600,
        }
    }
}

impl RefreshTokenConfig {
    /// Create a new RefreshTokenConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REFRESH_TOKEN_TTL_HOURS`: Refresh token lifetime in hours (default: 720)
    /// - `REFRESH_REUSE_POLICY`: `reject` or `revoke_all` (default: reject)
    /// - `REFRESH_SWEEP_INTERVAL_SECS`: Sweep period in seconds (default: 3600)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let ttl = std::env::var("REFRESH_TOKEN_TTL_HOURS")
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|hours| *hours > 0)
            .map(Duration::hours)
            .unwrap_or(defaults.ttl);

        let reuse_policy = match std::env::var("REFRESH_REUSE_POLICY") {
            Ok(value) => ReusePolicy::parse(&value)
                .ok_or_else(|| anyhow::anyhow!("Unknown REFRESH_REUSE_POLICY: {}", value))?,
            Err(_) => defaults.reuse_policy,
        };

        let sweep_interval_secs = std::env::var("REFRESH_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.sweep_interval_secs);

        Ok(Self {
            ttl,
            reuse_policy,
            sweep_interval_secs,
        })
    }
}

/// A newly generated refresh token. The plaintext leaves the process once and
/// is never stored.
#[derive(Debug)]
pub struct GeneratedToken {
    pub plaintext: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Deterministic one-way digest of a refresh token plaintext
pub fn hash_refresh_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

#[derive(Clone)]
pub struct RefreshLedger {
    store: Arc<dyn RefreshTokenStore>,
    ttl: Duration,
}

impl RefreshLedger {
    pub fn new(store: Arc<dyn RefreshTokenStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Draw 256 bits from the OS RNG and derive the stored digest
    pub fn generate(&self) -> GeneratedToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);

        let plaintext = URL_SAFE_NO_PAD.encode(bytes);
        let hash = hash_refresh_token(&plaintext);

        GeneratedToken {
            plaintext,
            hash,
            expires_at: Utc::now() + self.ttl,
        }
    }

    pub async fn store(
        &self,
        user_id: Uuid,
        hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<Uuid> {
        let row = self
            .store
            .insert(&NewRefreshToken {
                user_id,
                token_hash: hash.to_string(),
                expires_at,
            })
            .await?;

        debug!(token_id = %row.id, user_id = %user_id, "Stored refresh token");
        Ok(row.id)
    }

    /// Generate a token and persist its digest, returning the plaintext
    pub async fn issue(&self, user_id: Uuid) -> AuthResult<GeneratedToken> {
        let token = self.generate();
        self.store(user_id, &token.hash, token.expires_at).await?;
        Ok(token)
    }

    pub async fn lookup(&self, hash: &str) -> AuthResult<Option<RefreshToken>> {
        Ok(self.store.find_by_hash(hash).await?)
    }

    /// Returns 1 for the caller that performed the revocation, 0 for anyone
    /// who finds the row already revoked
    pub async fn revoke(&self, id: Uuid, reason: RevocationReason) -> AuthResult<u64> {
        Ok(self.store.revoke(id, Utc::now(), reason).await?)
    }

    pub async fn revoke_all(&self, user_id: Uuid, reason: RevocationReason) -> AuthResult<u64> {
        let affected = self
            .store
            .revoke_all_for_user(user_id, Utc::now(), reason)
            .await?;
        info!(
            user_id = %user_id,
            affected,
            reason = reason.as_str(),
            "Revoked all refresh tokens"
        );
        Ok(affected)
    }

    pub async fn active_for_user(&self, user_id: Uuid) -> AuthResult<Vec<RefreshToken>> {
        Ok(self.store.list_active(user_id, Utc::now()).await?)
    }

    /// Mark every expired, still unrevoked row as revoked
    pub async fn sweep_expired(&self) -> AuthResult<u64> {
        let affected = self.store.revoke_expired(Utc::now()).await?;
        if affected > 0 {
            info!(affected, "Marked expired refresh tokens revoked");
        }
        Ok(affected)
    }
}
