use sqlx::FromRow;
use time::OffsetDateTime;

use crate::auth::roles::Role;

/// User record in the database. Not serializable on purpose: every outward
/// view goes through a DTO that leaves out the hash and the refresh token.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub partner_code: String,
    pub partner_id: Option<i64>, // referring user, cleared when they are deleted
    pub refresh_token: Option<String>,
    pub is_blocked: bool,
    pub last_login: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Fields supplied when a user row is inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub partner_code: String,
    pub partner_id: Option<i64>,
}
