//! Middleware for bearer token validation and identity checks

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{
    AppState,
    error::{AuthError, AuthResult},
};

/// Identity extracted from a verified access token
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

/// Verify the bearer token and expose the caller as an `AuthUser` extension
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(AuthError::MissingToken)?;

    let claims = state.jwt_service.verify(bearer.token())?;
    debug!(user_id = %claims.user_id, "Authenticated request");

    req.extensions_mut().insert(AuthUser {
        id: claims.user_id,
        email: claims.email,
    });

    Ok(next.run(req).await)
}

/// Reject requests acting on behalf of a user other than the token's owner
pub fn ensure_same_user(auth: &AuthUser, claimed: Uuid) -> AuthResult<()> {
    if auth.id == claimed {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
