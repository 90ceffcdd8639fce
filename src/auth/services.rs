use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::auth::dto::{
    is_valid_email, present, LoginRequest, LoginResponse, PublicUser, RefreshRequest, RefreshResponse,
    RegisterRequest, UpdateRequest, UserListItem, UserProfile,
};
use crate::auth::jwt::TokenIssuer;
use crate::auth::password::PasswordHashing;
use crate::auth::referral;
use crate::auth::repo::UserStore;
use crate::auth::repo_types::{NewUser, User};
use crate::auth::roles::{Requester, Role};
use crate::error::AuthError;
use crate::restaurant::RestaurantClient;

/// Outcome of a suspend toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendState {
    Suspended,
    Reactivated,
}

impl SuspendState {
    pub fn message(&self) -> &'static str {
        match self {
            SuspendState::Suspended => "User suspended",
            SuspendState::Reactivated => "User reactivated",
        }
    }
}

/// Account lifecycle: registration, sessions, profile changes, suspension.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    tokens: TokenIssuer,
    passwords: PasswordHashing,
    restaurants: Arc<dyn RestaurantClient>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        tokens: TokenIssuer,
        passwords: PasswordHashing,
        restaurants: Arc<dyn RestaurantClient>,
    ) -> Self {
        Self {
            store,
            tokens,
            passwords,
            restaurants,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    async fn require_user(&self, id: i64) -> Result<User, AuthError> {
        self.store.find_by_id(id).await?.ok_or(AuthError::NotFound)
    }

    async fn restaurant_of(&self, user: &User) -> Option<String> {
        if user.role != Role::Restaurant {
            return None;
        }
        self.restaurants.restaurant_for_creator(user.id).await
    }

    #[instrument(skip(self, req), fields(email = req.email.as_deref().unwrap_or_default()))]
    pub async fn register(&self, req: RegisterRequest) -> Result<i64, AuthError> {
        let (Some(first_name), Some(last_name), Some(email), Some(password)) = (
            present(&req.first_name),
            present(&req.last_name),
            present(&req.email),
            present(&req.password),
        ) else {
            return Err(AuthError::MissingFields);
        };
        let role = match present(&req.role) {
            Some(raw) => raw.parse::<Role>().map_err(|e| {
                warn!(error = %e, "registration with unknown role");
                AuthError::InvalidRole
            })?,
            None => Role::default(),
        };
        if role.can_manage_users() {
            warn!(%role, "self-registration with a user-managing role");
        }
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail);
        }

        if self.store.find_by_email(email).await?.is_some() {
            warn!("email already registered");
            return Err(AuthError::DuplicateEmail);
        }

        let partner_id = match present(&req.partner_code) {
            Some(code) => {
                let partner = self.store.find_by_partner_code(code).await?;
                match partner {
                    Some(p) if p.role == role => Some(p.id),
                    Some(p) => {
                        warn!(partner_id = p.id, partner_role = %p.role, %role, "referral role mismatch");
                        return Err(AuthError::InvalidReferral);
                    }
                    None => {
                        warn!("unknown partner code");
                        return Err(AuthError::InvalidReferral);
                    }
                }
            }
            None => None,
        };

        let password_hash = self.passwords.hash(password)?;
        let partner_code = referral::generate(self.store.as_ref()).await?;

        let user = self
            .store
            .create(NewUser {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                email: email.to_string(),
                password_hash,
                role,
                partner_code,
                partner_id,
            })
            .await?;

        info!(user_id = user.id, %role, "user registered");
        Ok(user.id)
    }

    #[instrument(skip(self, req), fields(email = req.email.as_deref().unwrap_or_default()))]
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AuthError> {
        let (Some(email), Some(password)) = (present(&req.email), present(&req.password)) else {
            return Err(AuthError::InvalidCredentials);
        };

        let Some(user) = self.store.find_by_email(email).await? else {
            warn!("login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if user.is_blocked {
            warn!(user_id = user.id, "login on blocked account");
            return Err(AuthError::Blocked);
        }

        if !self.passwords.verify(password, &user.password_hash)? {
            warn!(user_id = user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        let restaurant_id = self.restaurant_of(&user).await;

        let access_token = self.tokens.issue_access(user.id)?;
        let refresh_token = self.tokens.issue_refresh(user.id)?;
        self.store
            .record_session(user.id, &refresh_token, OffsetDateTime::now_utc())
            .await?;

        info!(user_id = user.id, "user logged in");
        Ok(LoginResponse {
            access_token,
            refresh_token,
            user: PublicUser::from_user(&user, restaurant_id),
        })
    }

    /// Issues a new access token. The refresh token itself is not rotated, but
    /// it only works while it is the one stored by the latest login.
    #[instrument(skip_all)]
    pub async fn refresh(&self, req: RefreshRequest) -> Result<RefreshResponse, AuthError> {
        let presented = present(&req.refresh_token).ok_or(AuthError::MissingFields)?;
        let claims = self.tokens.verify_refresh(presented)?;
        let user_id = claims.user_id().ok_or(AuthError::InvalidRefresh)?;

        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .filter(|u| u.refresh_token.as_deref() == Some(presented))
            .ok_or_else(|| {
                warn!(user_id, "refresh token is not the current one");
                AuthError::InvalidRefresh
            })?;

        if user.is_blocked {
            warn!(user_id, "refresh on blocked account");
            return Err(AuthError::Blocked);
        }

        let access_token = self.tokens.issue_access(user.id)?;
        info!(user_id, "access token refreshed");
        Ok(RefreshResponse { access_token })
    }

    #[instrument(skip(self))]
    pub async fn suspend_toggle(&self, user_id: i64) -> Result<SuspendState, AuthError> {
        let user = self.require_user(user_id).await?;
        let blocked = !user.is_blocked;
        self.store.set_blocked(user.id, blocked).await?;
        let state = if blocked {
            SuspendState::Suspended
        } else {
            SuspendState::Reactivated
        };
        info!(user_id, ?state, "suspend toggled");
        Ok(state)
    }

    #[instrument(skip(self, requester, req), fields(requester_id = requester.id))]
    pub async fn update(&self, requester: Requester, req: UpdateRequest) -> Result<(), AuthError> {
        let target = requester.effective_target(req.user_id);
        if req.user_id.is_some_and(|id| id != target) {
            warn!(requested = ?req.user_id, target, "update redirected to requester");
        }
        let mut user = self.require_user(target).await?;

        if let Some(email) = present(&req.email) {
            if !is_valid_email(email) {
                return Err(AuthError::InvalidEmail);
            }
            if let Some(holder) = self.store.find_by_email(email).await? {
                if holder.id != user.id {
                    return Err(AuthError::DuplicateEmail);
                }
            }
            user.email = email.to_string();
        }
        if let Some(first_name) = present(&req.first_name) {
            user.first_name = first_name.to_string();
        }
        if let Some(last_name) = present(&req.last_name) {
            user.last_name = last_name.to_string();
        }

        if let (Some(current), Some(new)) =
            (present(&req.current_password), present(&req.new_password))
        {
            if requester.is_self(user.id) {
                if !self.passwords.verify(current, &user.password_hash)? {
                    warn!(user_id = user.id, "password change with wrong current password");
                    return Err(AuthError::InvalidCredentials);
                }
                user.password_hash = self.passwords.hash(new)?;
            } else {
                warn!(user_id = user.id, "password change on another account ignored");
            }
        }

        if let Some(code) = present(&req.partner_code) {
            // taken by anyone else, soft-deleted or retired
            if code != user.partner_code && self.store.partner_code_exists(code).await? {
                return Err(AuthError::DuplicateReferral);
            }
            user.partner_code = code.to_string();
        }

        if !self.store.save(&user).await? {
            warn!(user_id = user.id, "user vanished before update was written");
            return Err(AuthError::NotFound);
        }
        info!(user_id = user.id, "user updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: i64) -> Result<UserProfile, AuthError> {
        let user = self.require_user(user_id).await?;
        let partner = match user.partner_id {
            Some(pid) => self.store.find_by_id(pid).await?,
            None => None,
        };
        let referrals = self.store.count_referrals(user.id).await?;
        Ok(UserProfile::new(&user, partner.as_ref(), referrals))
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<UserListItem>, AuthError> {
        let users = self.store.list().await?;
        Ok(users.iter().map(UserListItem::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: i64) -> Result<(), AuthError> {
        if !self.store.delete(user_id).await? {
            return Err(AuthError::NotFound);
        }
        info!(user_id, "user deleted");
        Ok(())
    }

    /// Looks the restaurant up again; nothing is persisted.
    #[instrument(skip(self))]
    pub async fn refresh_restaurant(&self, user_id: i64) -> Result<Option<String>, AuthError> {
        let user = self.require_user(user_id).await?;
        Ok(self.restaurant_of(&user).await)
    }

    /// Resolves the caller behind an access token. Used by authenticated routes.
    pub async fn requester(&self, access_token: &str) -> Result<Requester, AuthError> {
        let claims = self.tokens.verify_access(access_token)?;
        let user_id = claims.user_id().ok_or(AuthError::InvalidToken)?;
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if user.is_blocked {
            return Err(AuthError::Blocked);
        }
        Ok(Requester {
            id: user.id,
            role: user.role,
        })
    }
}
