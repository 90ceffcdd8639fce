use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use crate::auth::roles::Requester;
use crate::error::AuthError;
use crate::state::AppState;

/// Extracts and validates the bearer access token, then loads the caller.
/// Blocked accounts are rejected here.
pub struct AuthUser(pub Requester);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Read Authorization header
        let auth = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::InvalidToken)?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or(AuthError::InvalidToken)?;

        let requester = state.auth.requester(token).await?;
        Ok(AuthUser(requester))
    }
}

/// An [`AuthUser`] whose role may act on other accounts.
pub struct Manager(pub Requester);

#[async_trait]
impl FromRequestParts<AppState> for Manager {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(requester) = AuthUser::from_request_parts(parts, state).await?;
        if !requester.role.can_manage_users() {
            warn!(user_id = requester.id, role = %requester.role, "manager route refused");
            return Err(AuthError::Forbidden);
        }
        Ok(Manager(requester))
    }
}
