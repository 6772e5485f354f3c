//! Credential store: password hashing, registration and verification

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use common::error::DatabaseError;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{AuthError, AuthResult},
    models::{NewUser, User},
    repositories::UserStore,
};

/// Verifies email/password pairs against stored Argon2id hashes
#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserStore>,
    /// Hash compared against when the email is unknown, so that lookups for
    /// missing accounts cost the same as for existing ones
    dummy_hash: Arc<str>,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserStore>) -> AuthResult<Self> {
        let dummy_hash = hash_password("dummy-password-for-unknown-accounts")?;
        Ok(Self {
            users,
            dummy_hash: dummy_hash.into(),
        })
    }

    /// Create an account. The email must already be normalized and validated.
    pub async fn register(&self, email: &str, handle: &str, password: &str) -> AuthResult<User> {
        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {}", e)))??;

        let new_user = NewUser {
            email: email.to_string(),
            handle: handle.to_string(),
            password_hash,
        };

        match self.users.create(&new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, "Registered user");
                Ok(user)
            }
            Err(DatabaseError::Duplicate(_)) => Err(AuthError::EmailTaken),
            Err(e) => Err(e.into()),
        }
    }

    /// Check an email/password pair, returning the matching user
    pub async fn verify(&self, email: &str, password: &str) -> AuthResult<User> {
        let user = self.users.find_by_email(email).await?;

        let stored_hash = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.dummy_hash.to_string(),
        };
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&stored_hash, &password))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {}", e)))?;

        match user {
            Some(user) if matches => Ok(user),
            Some(user) => {
                warn!(user_id = %user.id, "Password mismatch");
                Err(AuthError::InvalidCredentials)
            }
            None => Err(AuthError::InvalidCredentials),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        Ok(self.users.find_by_id(id).await?)
    }
}

fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("failed to hash password: {}", e)))
}

/// Constant-time comparison through the Argon2 verifier. An unparsable hash
/// never matches.
fn verify_password(stored_hash: &str, password: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is unparsable: {}", e);
            false
        }
    }
}
