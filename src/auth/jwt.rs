use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::auth::claims::{Claims, TokenKind};
use crate::config::JwtConfig;
use crate::error::AuthError;

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl KeyPair {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Signs and verifies access and refresh tokens. Each class has its own
/// secret, so a leaked refresh secret cannot mint access tokens and vice versa.
#[derive(Clone)]
pub struct TokenIssuer {
    access: KeyPair,
    refresh: KeyPair,
}

impl TokenIssuer {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            access: KeyPair::new(
                &config.access_secret,
                Duration::from_secs((config.ttl_minutes as u64) * 60),
            ),
            refresh: KeyPair::new(
                &config.refresh_secret,
                Duration::from_secs((config.refresh_ttl_minutes as u64) * 60),
            ),
        }
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub(crate) fn sign_at(
        &self,
        user_id: i64,
        kind: TokenKind,
        now: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let keys = self.keys(kind);
        let exp = now + TimeDuration::seconds(keys.ttl.as_secs() as i64);
        let mut jti = [0u8; 16];
        OsRng.fill_bytes(&mut jti);
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            kind,
            jti: hex::encode(jti),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)?;
        debug!(user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn issue_access(&self, user_id: i64) -> anyhow::Result<String> {
        self.sign_at(user_id, TokenKind::Access, OffsetDateTime::now_utc())
    }

    pub fn issue_refresh(&self, user_id: i64) -> anyhow::Result<String> {
        self.sign_at(user_id, TokenKind::Refresh, OffsetDateTime::now_utc())
    }

    /// Checks signature, expiry and token class. Any failure is reported as
    /// [`AuthError::InvalidToken`]; the exact cause is only logged.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.keys(kind).decoding, &validation).map_err(|e| {
            debug!(error = %e, kind = ?kind, "jwt rejected");
            AuthError::InvalidToken
        })?;

        if data.claims.kind != kind || data.claims.user_id().is_none() {
            debug!(kind = ?data.claims.kind, expected = ?kind, "jwt has wrong kind or subject");
            return Err(AuthError::InvalidToken);
        }
        Ok(data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(token, TokenKind::Refresh)
            .map_err(|_| AuthError::InvalidRefresh)
    }
}
