//! JWT service for access token issuance and verification
//!
//! Access tokens are stateless HS256 tokens signed with a shared secret.
//! Verification pins the algorithm, so a token whose header names any other
//! algorithm is rejected before its signature is even considered.

use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Shared HMAC signing secret
    pub secret: String,
    /// Value of the `iss` claim, checked on verification
    pub issuer: String,
    /// Access token expiration time in seconds (default: 24 hours)
    pub access_token_expiry: u64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_token_expiry", &self.access_token_expiry)
            .finish()
    }
}

impl JwtConfig {
    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: HMAC signing secret (required)
    /// - `JWT_ISSUER`: Token issuer (default: "auth-service")
    /// - `JWT_ACCESS_TOKEN_EXPIRY`: Access token expiry in seconds (default: 86400)
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;

        if secret.len() < 32 {
            warn!("JWT_SECRET is shorter than 32 bytes");
        }

        let issuer = std::env::var("JWT_ISSUER")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "auth-service".to_string());

        let access_token_expiry = std::env::var("JWT_ACCESS_TOKEN_EXPIRY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .unwrap_or(86_400);

        Ok(JwtConfig {
            secret,
            issuer,
            access_token_expiry,
        })
    }
}

/// Claims carried by an access token.
///
/// Every field is required; a token missing any of them, or carrying one with
/// the wrong type, fails to decode and is treated as malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub user_id: Uuid,
    pub email: String,
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss"]);

        JwtService {
            encoding_key,
            decoding_key,
            validation,
            config,
        }
    }

    /// Issue an access token for a user
    pub fn issue(&self, user_id: Uuid, email: &str) -> AuthResult<String> {
        let now = Utc::now().timestamp();
        let claims = AccessTokenClaims {
            user_id,
            email: email.to_string(),
            issuer: self.config.issuer.clone(),
            issued_at: now,
            expires_at: now + self.config.access_token_expiry as i64,
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("failed to sign access token: {}", e)))
    }

    /// Verify a token and return its claims
    pub fn verify(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Access token rejected: {}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                        AuthError::BadSignature
                    }
                    _ => AuthError::TokenMalformed,
                }
            })
    }

    /// Get the access token expiry time in seconds
    pub fn access_token_expiry(&self) -> u64 {
        self.config.access_token_expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;

    const SECRET: &str = "test-secret-with-enough-bytes-1234567890";

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            secret: SECRET.to_string(),
            issuer: "auth-test".to_string(),
            access_token_expiry: 86_400,
        })
    }

    fn sign(claims: &serde_json::Value, header: Header, secret: &str) -> String {
        encode(&header, claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_issue_then_verify() {
        let jwt = service();
        let user_id = Uuid::new_v4();
        let token = jwt.issue(user_id, "a@x.test").unwrap();

        let claims = jwt.verify(&token).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.email, "a@x.test");
        assert_eq!(claims.issuer, "auth-test");
        assert_eq!(claims.expires_at - claims.issued_at, 86_400);
    }

    #[test]
    fn test_expired_token() {
        let now = Utc::now().timestamp();
        let token = sign(
            &json!({
                "user_id": Uuid::new_v4(),
                "email": "a@x.test",
                "iss": "auth-test",
                "iat": now - 7200,
                "exp": now - 3600,
            }),
            Header::new(Algorithm::HS256),
            SECRET,
        );

        assert!(matches!(service().verify(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_wrong_secret_is_bad_signature() {
        let other = JwtService::new(JwtConfig {
            secret: "another-secret".to_string(),
            issuer: "auth-test".to_string(),
            access_token_expiry: 60,
        });
        let token = other.issue(Uuid::new_v4(), "a@x.test").unwrap();

        assert!(matches!(service().verify(&token), Err(AuthError::BadSignature)));
    }

    #[test]
    fn test_other_algorithm_is_rejected() {
        let now = Utc::now().timestamp();
        let token = sign(
            &json!({
                "user_id": Uuid::new_v4(),
                "email": "a@x.test",
                "iss": "auth-test",
                "iat": now,
                "exp": now + 3600,
            }),
            Header::new(Algorithm::HS512),
            SECRET,
        );

        assert!(matches!(service().verify(&token), Err(AuthError::BadSignature)));
    }

    #[test]
    fn test_missing_claim_is_malformed() {
        let now = Utc::now().timestamp();
        let token = sign(
            &json!({
                "email": "a@x.test",
                "iss": "auth-test",
                "iat": now,
                "exp": now + 3600,
            }),
            Header::new(Algorithm::HS256),
            SECRET,
        );

        assert!(matches!(service().verify(&token), Err(AuthError::TokenMalformed)));
    }

    #[test]
    fn test_mistyped_claim_is_malformed() {
        let now = Utc::now().timestamp();
        let token = sign(
            &json!({
                "user_id": 42,
                "email": "a@x.test",
                "iss": "auth-test",
                "iat": now,
                "exp": now + 3600,
            }),
            Header::new(Algorithm::HS256),
            SECRET,
        );

        assert!(matches!(service().verify(&token), Err(AuthError::TokenMalformed)));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            service().verify("not.a.token"),
            Err(AuthError::TokenMalformed)
        ));
    }

    #[test]
    #[serial]
    fn test_jwt_config_from_env() {
        unsafe {
            std::env::set_var("JWT_SECRET", SECRET);
            std::env::remove_var("JWT_ISSUER");
            std::env::set_var("JWT_ACCESS_TOKEN_EXPIRY", "0");
        }

        let config = JwtConfig::from_env().unwrap();
        assert_eq!(config.issuer, "auth-service");
        assert_eq!(config.access_token_expiry, 86_400);
        assert!(!format!("{:?}", config).contains(SECRET));

        unsafe {
            std::env::remove_var("JWT_SECRET");
            std::env::remove_var("JWT_ACCESS_TOKEN_EXPIRY");
        }
        assert!(JwtConfig::from_env().is_err());
    }
}
