use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::auth::repo::{StoreResult, UserStore};
use crate::auth::repo_types::{NewUser, User};
use crate::error::{StoreError, UniqueField};

/// Mutex-guarded map standing in for Postgres in tests. Each call is atomic
/// and constraint checks happen inside the lock, like a unique index would.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    rows: BTreeMap<i64, User>,
    retired_codes: HashSet<String>,
}

impl Inner {
    fn live(&self) -> impl Iterator<Item = &User> {
        self.rows.values().filter(|u| u.deleted_at.is_none())
    }

    fn check_unique(&self, id: Option<i64>, email: &str, code: &str) -> StoreResult<()> {
        if self.live().any(|u| Some(u.id) != id && u.email == email) {
            return Err(StoreError::Conflict(UniqueField::Email));
        }
        if self.retired_codes.contains(code)
            || self
                .rows
                .values()
                .any(|u| Some(u.id) != id && u.partner_code == code)
        {
            return Err(StoreError::Conflict(UniqueField::PartnerCode));
        }
        Ok(())
    }
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().live().count()
    }

    /// Marks a row deleted without removing it.
    pub fn soft_delete(&self, id: i64) {
        if let Some(user) = self.lock().rows.get_mut(&id) {
            user.deleted_at = Some(OffsetDateTime::now_utc());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.lock().live().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.lock().live().find(|u| u.email == email).cloned())
    }

    async fn find_by_partner_code(&self, code: &str) -> StoreResult<Option<User>> {
        Ok(self.lock().live().find(|u| u.partner_code == code).cloned())
    }

    async fn partner_code_exists(&self, code: &str) -> StoreResult<bool> {
        let inner = self.lock();
        Ok(inner.retired_codes.contains(code) || inner.rows.values().any(|u| u.partner_code == code))
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        Ok(self.lock().live().cloned().collect())
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut inner = self.lock();
        inner.check_unique(None, &new.email, &new.partner_code)?;
        inner.next_id += 1;
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: inner.next_id,
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            partner_code: new.partner_code,
            partner_id: new.partner_id,
            refresh_token: None,
            is_blocked: false,
            last_login: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        inner.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn save(&self, user: &User) -> StoreResult<bool> {
        let mut inner = self.lock();
        inner.check_unique(Some(user.id), &user.email, &user.partner_code)?;
        let Some(row) = inner
            .rows
            .get_mut(&user.id)
            .filter(|row| row.deleted_at.is_none())
        else {
            return Ok(false);
        };
        let previous_code = std::mem::replace(&mut row.partner_code, user.partner_code.clone());
        row.first_name = user.first_name.clone();
        row.last_name = user.last_name.clone();
        row.email = user.email.clone();
        row.password_hash = user.password_hash.clone();
        row.updated_at = OffsetDateTime::now_utc();
        if previous_code != user.partner_code {
            inner.retired_codes.insert(previous_code);
        }
        Ok(true)
    }

    async fn record_session(
        &self,
        id: i64,
        refresh_token: &str,
        at: OffsetDateTime,
    ) -> StoreResult<()> {
        if let Some(row) = self.lock().rows.get_mut(&id) {
            row.refresh_token = Some(refresh_token.to_string());
            row.last_login = Some(at);
        }
        Ok(())
    }

    async fn set_blocked(&self, id: i64, blocked: bool) -> StoreResult<()> {
        if let Some(row) = self.lock().rows.get_mut(&id) {
            row.is_blocked = blocked;
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut inner = self.lock();
        if !inner.rows.get(&id).is_some_and(|u| u.deleted_at.is_none()) {
            return Ok(false);
        }
        let Some(removed) = inner.rows.remove(&id) else {
            return Ok(false);
        };
        inner.retired_codes.insert(removed.partner_code);
        for row in inner.rows.values_mut() {
            if row.partner_id == Some(id) {
                row.partner_id = None;
            }
        }
        Ok(true)
    }

    async fn count_referrals(&self, id: i64) -> StoreResult<i64> {
        Ok(self.lock().live().filter(|u| u.partner_id == Some(id)).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::roles::Role;

    fn new_user(email: &str, code: &str) -> NewUser {
        NewUser {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::User,
            partner_code: code.into(),
            partner_id: None,
        }
    }

    #[tokio::test]
    async fn deleted_codes_stay_taken() {
        let store = MemoryUserStore::new();
        let ada = store.create(new_user("ada@example.com", "aaaaaaaaaa")).await.unwrap();
        assert!(store.delete(ada.id).await.unwrap());

        assert!(store.partner_code_exists("aaaaaaaaaa").await.unwrap());
        assert!(matches!(
            store.create(new_user("grace@example.com", "aaaaaaaaaa")).await,
            Err(StoreError::Conflict(UniqueField::PartnerCode))
        ));
    }

    #[tokio::test]
    async fn replaced_codes_stay_taken() {
        let store = MemoryUserStore::new();
        let mut ada = store.create(new_user("ada@example.com", "aaaaaaaaaa")).await.unwrap();
        ada.partner_code = "bbbbbbbbbb".into();
        assert!(store.save(&ada).await.unwrap());

        assert!(store.partner_code_exists("aaaaaaaaaa").await.unwrap());
        let mut grace = store.create(new_user("grace@example.com", "cccccccccc")).await.unwrap();
        grace.partner_code = "aaaaaaaaaa".into();
        assert!(matches!(
            store.save(&grace).await,
            Err(StoreError::Conflict(UniqueField::PartnerCode))
        ));
    }

    #[tokio::test]
    async fn save_and_delete_skip_missing_rows() {
        let store = MemoryUserStore::new();
        let ada = store.create(new_user("ada@example.com", "aaaaaaaaaa")).await.unwrap();
        store.soft_delete(ada.id);

        assert!(!store.save(&ada).await.unwrap());
        assert!(!store.delete(ada.id).await.unwrap());
        assert!(!store.delete(999).await.unwrap());
    }
}
