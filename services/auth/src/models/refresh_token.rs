//! Refresh token ledger rows

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted refresh token. Only the digest of the plaintext is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Raw `RevocationReason` text, set together with `revoked_at`
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Logical state of a ledger row at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Active,
    /// Past `expires_at` but not yet marked revoked
    Expired,
    Revoked,
}

/// Why a row left the Active state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// Superseded by a newer token during refresh
    Rotated,
    Logout,
    LogoutAll,
    /// Found or swept past its expiry
    Expired,
    /// Ended because a rotated token was replayed
    ReuseDetected,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Rotated => "rotated",
            RevocationReason::Logout => "logout",
            RevocationReason::LogoutAll => "logout_all",
            RevocationReason::Expired => "expired",
            RevocationReason::ReuseDetected => "reuse_detected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rotated" => Some(RevocationReason::Rotated),
            "logout" => Some(RevocationReason::Logout),
            "logout_all" => Some(RevocationReason::LogoutAll),
            "expired" => Some(RevocationReason::Expired),
            "reuse_detected" => Some(RevocationReason::ReuseDetected),
            _ => None,
        }
    }
}

impl RefreshToken {
    /// Classify the row. Revocation wins over expiry.
    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        if self.revoked_at.is_some() {
            TokenState::Revoked
        } else if now >= self.expires_at {
            TokenState::Expired
        } else {
            TokenState::Active
        }
    }

    pub fn revocation_reason(&self) -> Option<RevocationReason> {
        self.revoked_reason
            .as_deref()
            .and_then(RevocationReason::parse)
    }
}

/// Ledger insert payload
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}
