use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::auth::repo_types::{NewUser, User};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent user records. Implementations must enforce email uniqueness
/// among live rows and partner-code uniqueness among all rows, reporting
/// violations as [`StoreError::Conflict`]. Reads skip soft-deleted rows.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_by_partner_code(&self, code: &str) -> StoreResult<Option<User>>;
    /// Unlike the finders this also sees soft-deleted rows and the codes of
    /// deleted users or codes a user has moved away from. Such codes are
    /// never handed out again.
    async fn partner_code_exists(&self, code: &str) -> StoreResult<bool>;
    async fn list(&self) -> StoreResult<Vec<User>>;
    async fn create(&self, new: NewUser) -> StoreResult<User>;
    /// Persists the profile fields (names, email, password hash, partner code).
    /// Returns `false` when no live row with that id exists any more.
    async fn save(&self, user: &User) -> StoreResult<bool>;
    /// Replaces the stored refresh token; the previous one stops working.
    async fn record_session(
        &self,
        id: i64,
        refresh_token: &str,
        at: OffsetDateTime,
    ) -> StoreResult<()>;
    async fn set_blocked(&self, id: i64, blocked: bool) -> StoreResult<()>;
    /// Hard delete of a live row. Referees of the deleted user get their
    /// `partner_id` cleared and the partner code is retired.
    async fn delete(&self, id: i64) -> StoreResult<bool>;
    async fn count_referrals(&self, id: i64) -> StoreResult<i64>;
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, password_hash, role, partner_code, \
     partner_id, refresh_token, is_blocked, last_login, created_at, updated_at, deleted_at";

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_where(&self, predicate: &str, value: &str) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {predicate} = $1 AND deleted_at IS NULL"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_where("email", email).await
    }

    async fn find_by_partner_code(&self, code: &str) -> StoreResult<Option<User>> {
        self.find_where("partner_code", code).await
    }

    async fn partner_code_exists(&self, code: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar(
                r#"
                SELECT EXISTS (SELECT 1 FROM users WHERE partner_code = $1)
                    OR EXISTS (SELECT 1 FROM retired_partner_codes WHERE code = $1)
                "#,
            )
            .bind(code)
            .fetch_one(&self.db)
            .await?;
        Ok(exists)
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY id");
        let users = sqlx::query_as::<_, User>(&sql).fetch_all(&self.db).await?;
        Ok(users)
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (first_name, last_name, email, password_hash, role, partner_code, partner_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(&new.first_name)
            .bind(&new.last_name)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(new.role.as_str())
            .bind(&new.partner_code)
            .bind(new.partner_id)
            .fetch_one(&self.db)
            .await?;
        Ok(user)
    }

    async fn save(&self, user: &User) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET first_name = $2, last_name = $3, email = $4, password_hash = $5,
                partner_code = $6, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.partner_code)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_session(
        &self,
        id: i64,
        refresh_token: &str,
        at: OffsetDateTime,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $2, last_login = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(refresh_token)
        .bind(at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_blocked(&self, id: i64, blocked: bool) -> StoreResult<()> {
        sqlx::query("UPDATE users SET is_blocked = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(blocked)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        // partner_id references are cleared by ON DELETE SET NULL, the code is
        // retired by the users_retire_partner_code trigger
        let result = sqlx::query("DELETE FROM users WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_referrals(&self, id: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE partner_id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }
}
