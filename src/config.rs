use anyhow::{bail, Context};
use serde::Deserialize;

use crate::auth::gate::OpenRoute;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Argon2id cost. `None` keeps the argon2 crate defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: Option<u32>,
    pub iterations: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub base_endpoint: String,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub open_routes: Vec<OpenRoute>,
    pub restaurant_service_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let base_endpoint = normalize_base(
            &std::env::var("BASE_ENDPOINT").unwrap_or_else(|_| "/api-auth".into()),
        );

        let jwt = JwtConfig {
            access_secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            refresh_secret: std::env::var("JWT_REFRESH_SECRET")
                .context("JWT_REFRESH_SECRET is not set")?,
            ttl_minutes: env_number("JWT_TTL_MINUTES")?.unwrap_or(15),
            refresh_ttl_minutes: env_number("JWT_REFRESH_TTL_MINUTES")?.unwrap_or(60 * 24 * 7),
        };
        jwt.validate()?;

        let password = PasswordConfig {
            memory_kib: env_number("PASSWORD_MEMORY_KIB")?,
            iterations: env_number("PASSWORD_ITERATIONS")?,
        };

        let open_routes = match std::env::var("OPEN_ROUTES") {
            Ok(raw) if !raw.trim().is_empty() => parse_open_routes(&raw)?,
            _ => default_open_routes(&base_endpoint),
        };

        let restaurant_service_url = std::env::var("RESTAURANT_SERVICE_URL")
            .ok()
            .map(|v| v.trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            database_url,
            base_endpoint,
            jwt,
            password,
            open_routes,
            restaurant_service_url,
        })
    }
}

impl JwtConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            bail!("JWT secrets must not be empty");
        }
        if self.access_secret == self.refresh_secret {
            bail!("JWT_SECRET and JWT_REFRESH_SECRET must be different");
        }
        if self.ttl_minutes <= 0 || self.refresh_ttl_minutes <= 0 {
            bail!("JWT TTLs must be positive");
        }
        Ok(())
    }
}

fn env_number<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{key} is not a valid number")),
        Err(_) => Ok(None),
    }
}

fn normalize_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Parses `METHOD /prefix` entries separated by commas, e.g.
/// `POST /api-auth/login, GET /api/restaurants`.
pub fn parse_open_routes(raw: &str) -> anyhow::Result<Vec<OpenRoute>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (method, path) = entry
                .split_once(char::is_whitespace)
                .with_context(|| format!("open route `{entry}` must be `METHOD /prefix`"))?;
            let path = path.trim();
            if !path.starts_with('/') {
                bail!("open route `{entry}` must have a path starting with `/`");
            }
            Ok(OpenRoute::new(path, method))
        })
        .collect()
}

pub fn default_open_routes(base_endpoint: &str) -> Vec<OpenRoute> {
    ["register", "login", "refresh"]
        .iter()
        .map(|op| OpenRoute::new(format!("{}/{op}", base_endpoint.trim_end_matches('/')), "POST"))
        .collect()
}
