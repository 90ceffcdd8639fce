use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Account role, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Restaurant,
    Deliveryman,
    Developer,
    Marketing,
    Technical,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::User,
        Role::Restaurant,
        Role::Deliveryman,
        Role::Developer,
        Role::Marketing,
        Role::Technical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Restaurant => "restaurant",
            Role::Deliveryman => "deliveryman",
            Role::Developer => "developer",
            Role::Marketing => "marketing",
            Role::Technical => "technical",
        }
    }

    /// The only capability check in the authority: may this role act on
    /// accounts other than its own.
    pub fn can_manage_users(&self) -> bool {
        matches!(self, Role::Marketing)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Authenticated caller of a direct (non-gateway) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub id: i64,
    pub role: Role,
}

impl Requester {
    /// Resolves which account an operation acts on. Managers may name any
    /// account; everyone else is pinned to their own id whatever they asked for.
    pub fn effective_target(&self, requested: Option<i64>) -> i64 {
        match requested {
            Some(target) if self.role.can_manage_users() => target,
            _ => self.id,
        }
    }

    pub fn is_self(&self, user_id: i64) -> bool {
        self.id == user_id
    }
}
