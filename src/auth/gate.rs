//! Forward-auth decision procedure.
//!
//! The gateway sends every proxied request here first, passing the original
//! target in `X-Forwarded-Uri` / `X-Forwarded-Method`. Open routes pass without
//! a credential; everything else needs a valid access token whose owner is not
//! blocked. On success the caller's identity is handed downstream as JSON in
//! the `X-User` header.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use url::Url;

use crate::auth::claims::Claims;
use crate::auth::jwt::TokenIssuer;
use crate::auth::repo::UserStore;
use crate::auth::repo_types::User;
use crate::auth::roles::Role;

pub const FORWARDED_URI: &str = "x-forwarded-uri";
pub const FORWARDED_METHOD: &str = "x-forwarded-method";
pub const USER_HEADER: &str = "x-user";
pub const SOCKET_TOKEN_PARAM: &str = "socketToken";

/// A `(path prefix, method)` pair exempt from credential checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRoute {
    pub path_prefix: String,
    pub method: String,
}

impl OpenRoute {
    pub fn new(path_prefix: impl Into<String>, method: &str) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            method: method.trim().to_ascii_uppercase(),
        }
    }

    pub fn matches(&self, path: &str, method: &str) -> bool {
        path.starts_with(&self.path_prefix) && self.method.eq_ignore_ascii_case(method)
    }
}

/// What the gateway tells us about the request it is holding.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardedRequest<'a> {
    pub uri: Option<&'a str>,
    pub method: Option<&'a str>,
    pub authorization: Option<&'a str>,
}

/// Identity handed to downstream services.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub partner_code: String,
    #[serde(flatten)]
    pub claims: Claims,
}

impl Identity {
    fn new(user: &User, claims: Claims) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            role: user.role,
            partner_code: user.partner_code.clone(),
            claims,
        }
    }

    /// JSON with every non-printable-ASCII character `\u`-escaped, so the
    /// result is always a legal header value.
    pub fn header_value(&self) -> serde_json::Result<String> {
        let raw = serde_json::to_string(self)?;
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            if matches!(c, ' '..='~') {
                out.push(c);
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug)]
pub enum Decision {
    /// Open route, no credential looked at.
    Open,
    Allow(Box<Identity>),
}

/// Why a request was turned away. Every variant but `Internal` answers 401;
/// the distinction between them is for the audit log.
#[derive(Debug, thiserror::Error)]
pub enum Denial {
    #[error("Access denied")]
    NoCredential,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Invalid token")]
    UnknownUser,
    #[error("Your account has been blocked")]
    Blocked,
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl Denial {
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::NoCredential => "no_credential",
            Denial::InvalidToken => "invalid_token",
            Denial::UnknownUser => "unknown_user",
            Denial::Blocked => "blocked",
            Denial::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let status = match self {
            Denial::Internal(ref e) => {
                error!(error = ?e, "forward-auth lookup failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::UNAUTHORIZED,
        };
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

struct ForwardedUri {
    path: String,
    query: Option<String>,
}

impl ForwardedUri {
    /// Accepts both absolute URLs and origin-form (`/path?query`) targets.
    fn parse(raw: &str) -> Self {
        if let Ok(url) = Url::parse(raw) {
            return Self {
                path: url.path().to_string(),
                query: url.query().map(str::to_string),
            };
        }
        let without_fragment = raw.split('#').next().unwrap_or_default();
        match without_fragment.split_once('?') {
            Some((path, query)) => Self {
                path: path.to_string(),
                query: Some(query.to_string()),
            },
            None => Self {
                path: without_fragment.to_string(),
                query: None,
            },
        }
    }

    fn socket_token(&self) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == SOCKET_TOKEN_PARAM)
            .map(|(_, value)| value.into_owned())
    }
}

pub struct ForwardAuthGate {
    store: Arc<dyn UserStore>,
    tokens: TokenIssuer,
    open_routes: Vec<OpenRoute>,
}

impl ForwardAuthGate {
    pub fn new(store: Arc<dyn UserStore>, tokens: TokenIssuer, open_routes: Vec<OpenRoute>) -> Self {
        Self {
            store,
            tokens,
            open_routes,
        }
    }

    fn is_open(&self, path: &str, method: &str) -> bool {
        self.open_routes.iter().any(|r| r.matches(path, method))
    }

    pub async fn decide(&self, req: ForwardedRequest<'_>) -> Result<Decision, Denial> {
        let uri = req.uri.map(ForwardedUri::parse);

        // before any credential handling
        if let (Some(uri), Some(method)) = (&uri, req.method) {
            if self.is_open(&uri.path, method) {
                info!(decision = "open", path = %uri.path, method, "forward-auth");
                return Ok(Decision::Open);
            }
        }

        let result = self.authenticate(req.authorization, uri.as_ref()).await;
        match &result {
            Ok(Decision::Allow(identity)) => {
                info!(decision = "allow", user_id = identity.id, "forward-auth")
            }
            Ok(Decision::Open) => {}
            Err(denial) => warn!(
                decision = "deny",
                reason = denial.reason(),
                path = uri.as_ref().map(|u| u.path.as_str()).unwrap_or_default(),
                "forward-auth"
            ),
        }
        result
    }

    async fn authenticate(
        &self,
        authorization: Option<&str>,
        uri: Option<&ForwardedUri>,
    ) -> Result<Decision, Denial> {
        let raw = match authorization.filter(|v| !v.trim().is_empty()) {
            Some(header) => Some(header.to_string()),
            None => uri.and_then(ForwardedUri::socket_token),
        };
        let token = raw
            .as_deref()
            .map(|t| t.strip_prefix("Bearer ").unwrap_or(t).trim())
            .filter(|t| !t.is_empty())
            .ok_or(Denial::NoCredential)?;

        let claims = self
            .tokens
            .verify_access(token)
            .map_err(|_| Denial::InvalidToken)?;
        let user_id = claims.user_id().ok_or(Denial::InvalidToken)?;

        let user = self
            .store
            .find_by_id(user_id)
            .await
            .map_err(|e| Denial::Internal(e.into()))?
            .ok_or(Denial::UnknownUser)?;

        if user.is_blocked {
            return Err(Denial::Blocked);
        }

        Ok(Decision::Allow(Box::new(Identity::new(&user, claims))))
    }
}
