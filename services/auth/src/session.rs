//! Session service: login, refresh-token rotation and revocation
//!
//! Each refresh token row moves Active -> Revoked exactly once. Rotation
//! revokes the presented row through a conditional update and only proceeds
//! when this call is the one that flipped it, so concurrent presentations of
//! the same token produce a single new pair.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    credentials::CredentialStore,
    error::{AuthError, AuthResult},
    jwt::JwtService,
    ledger::{RefreshLedger, ReusePolicy, hash_refresh_token},
    models::{RefreshToken, RevocationReason, TokenState, User},
    validation::normalize_email,
};

/// Access and refresh token handed back to the caller
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    /// Plaintext refresh token; this is the only time it is available
    pub refresh_token: String,
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub user: User,
}

/// Session manager orchestrating credentials, signer and ledger
#[derive(Clone)]
pub struct SessionService {
    credentials: CredentialStore,
    jwt_service: JwtService,
    ledger: RefreshLedger,
    reuse_policy: ReusePolicy,
}

impl SessionService {
    /// Create a new session service
    pub fn new(
        credentials: CredentialStore,
        jwt_service: JwtService,
        ledger: RefreshLedger,
        reuse_policy: ReusePolicy,
    ) -> Self {
        Self {
            credentials,
            jwt_service,
            ledger,
            reuse_policy,
        }
    }

    pub fn jwt_service(&self) -> &JwtService {
        &self.jwt_service
    }

    pub fn ledger(&self) -> &RefreshLedger {
        &self.ledger
    }

    /// Verify credentials and open a new session
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<LoginOutcome> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(AuthError::MissingField("email"));
        }
        if password.is_empty() {
            return Err(AuthError::MissingField("password"));
        }

        let user = self.credentials.verify(&email, password).await?;
        let tokens = self.open_session(&user).await?;

        info!(user_id = %user.id, "User logged in");
        Ok(LoginOutcome { tokens, user })
    }

    /// Exchange a refresh token for a new pair, revoking the presented one
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(AuthError::MissingField("refresh_token"));
        }

        let row = self
            .ledger
            .lookup(&hash_refresh_token(refresh_token))
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        match row.state_at(Utc::now()) {
            TokenState::Active => {}
            TokenState::Revoked => return Err(self.revoked_refresh(&row).await),
            TokenState::Expired => {
                if let Err(e) = self.ledger.revoke(row.id, RevocationReason::Expired).await {
                    warn!(token_id = %row.id, "Failed to mark expired refresh token: {}", e);
                }
                return Err(AuthError::RefreshTokenExpired);
            }
        }

        let user = self
            .credentials
            .find_by_id(row.user_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        if self.ledger.revoke(row.id, RevocationReason::Rotated).await? == 0 {
            // Another rotation of this row committed first
            self.on_reuse(&row).await;
            return Err(AuthError::RefreshTokenRevoked);
        }

        let tokens = self.open_session(&user).await?;
        info!(user_id = %user.id, rotated = %row.id, "Rotated refresh token");
        Ok(tokens)
    }

    /// Revoke the session behind one refresh token
    pub async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(AuthError::MissingField("refresh_token"));
        }

        let row = self
            .ledger
            .lookup(&hash_refresh_token(refresh_token))
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        if self.ledger.revoke(row.id, RevocationReason::Logout).await? == 0 {
            return Err(AuthError::InvalidRefreshToken);
        }

        info!(user_id = %row.user_id, "User logged out");
        Ok(())
    }

    /// Revoke every session of a user. `user_id` must come from a verified
    /// access token.
    pub async fn logout_all(&self, user_id: Uuid) -> AuthResult<u64> {
        self.ledger
            .revoke_all(user_id, RevocationReason::LogoutAll)
            .await
    }

    pub async fn active_sessions(&self, user_id: Uuid) -> AuthResult<Vec<RefreshToken>> {
        self.ledger.active_for_user(user_id).await
    }

    /// Mark expired rows revoked
    pub async fn sweep_expired(&self) -> AuthResult<u64> {
        self.ledger.sweep_expired().await
    }

    async fn open_session(&self, user: &User) -> AuthResult<TokenPair> {
        let access_token = self.jwt_service.issue(user.id, &user.email)?;
        let refresh = self.ledger.issue(user.id).await?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.plaintext,
        })
    }

    /// Map an already revoked row to the error its revocation calls for.
    /// A logged-out token is no longer a valid session at all, while a
    /// rotated one being replayed is treated as reuse.
    async fn revoked_refresh(&self, row: &RefreshToken) -> AuthError {
        match row.revocation_reason() {
            Some(RevocationReason::Logout) => AuthError::InvalidRefreshToken,
            Some(RevocationReason::Expired) => AuthError::RefreshTokenExpired,
            Some(RevocationReason::Rotated) => {
                self.on_reuse(row).await;
                AuthError::RefreshTokenRevoked
            }
            _ => AuthError::RefreshTokenRevoked,
        }
    }

    async fn on_reuse(&self, row: &RefreshToken) {
        warn!(
            user_id = %row.user_id,
            token_id = %row.id,
            "Revoked refresh token presented again"
        );

        if self.reuse_policy == ReusePolicy::RevokeAll {
            let revoked = self
                .ledger
                .revoke_all(row.user_id, RevocationReason::ReuseDetected)
                .await;
            if let Err(e) = revoked {
                warn!(user_id = %row.user_id, "Failed to revoke sessions after reuse: {}", e);
            }
        }
    }
}
