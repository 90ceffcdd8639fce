use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod dto;
pub mod extractors;
pub mod gate;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod referral;
pub mod repo;
pub mod repo_types;
pub mod roles;
pub mod services;

#[cfg(test)]
pub(crate) mod memory;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::account_routes())
        .merge(handlers::manager_routes())
}
