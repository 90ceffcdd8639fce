use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Which unique constraint a write collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    PartnerCode,
}

/// Failure reported by a [`crate::auth::repo::UserStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {0:?}")]
    Conflict(UniqueField),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                match db_err.constraint() {
                    Some("users_email_key") => return StoreError::Conflict(UniqueField::Email),
                    Some("users_partner_code_key") => {
                        return StoreError::Conflict(UniqueField::PartnerCode)
                    }
                    _ => {}
                }
            }
        }
        StoreError::Backend(err.into())
    }
}

/// Business-level failure of an authority operation.
///
/// Messages are fixed per kind: credential failures never say which half was
/// wrong and token failures never say which validation step rejected them.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing required fields")]
    MissingFields,
    #[error("Email already in use")]
    DuplicateEmail,
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Invalid role")]
    InvalidRole,
    #[error("Partner code already in use")]
    DuplicateReferral,
    #[error("Invalid partner code")]
    InvalidReferral,
    #[error("Incorrect email or password")]
    InvalidCredentials,
    #[error("Your account has been blocked")]
    Blocked,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Invalid refresh token")]
    InvalidRefresh,
    #[error("User not found")]
    NotFound,
    #[error("Forbidden")]
    Forbidden,
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingFields => "missing_fields",
            AuthError::DuplicateEmail => "duplicate_email",
            AuthError::InvalidEmail => "invalid_email",
            AuthError::InvalidRole => "invalid_role",
            AuthError::DuplicateReferral => "duplicate_referral",
            AuthError::InvalidReferral => "invalid_referral",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::Blocked => "blocked",
            AuthError::InvalidToken => "invalid_token",
            AuthError::InvalidRefresh => "invalid_refresh",
            AuthError::NotFound => "not_found",
            AuthError::Forbidden => "forbidden",
            AuthError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingFields
            | AuthError::DuplicateEmail
            | AuthError::InvalidEmail
            | AuthError::InvalidRole
            | AuthError::DuplicateReferral
            | AuthError::InvalidReferral => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials
            | AuthError::Blocked
            | AuthError::InvalidToken
            | AuthError::InvalidRefresh => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(UniqueField::Email) => AuthError::DuplicateEmail,
            StoreError::Conflict(UniqueField::PartnerCode) => AuthError::DuplicateReferral,
            StoreError::Backend(e) => AuthError::Internal(e),
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::Internal(err)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Internal(ref source) = self {
            error!(error = ?source, "internal error");
        }
        let body = Json(json!({
            "kind": self.kind(),
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}
