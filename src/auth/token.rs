//! Bearer-token signing and verification

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use tracing::error;

use super::models::{Claims, Principal};

/// Fixed validity window for issued tokens.
pub fn default_ttl() -> Duration {
    Duration::days(7)
}

/// Verification failures, distinguishable in logs and telemetry.
///
/// At the HTTP boundary `Malformed`, `SignatureInvalid` and `Expired` all
/// collapse into one "invalid token" 401 so callers cannot probe which check
/// failed. `Misconfigured` is a deployment fault and maps to a 500 instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token has expired")]
    Expired,
    #[error("signing secret is not configured")]
    Misconfigured,
}

/// Signs and verifies the compact bearer tokens this service issues.
///
/// HS256 with a single shared secret. The scheme is fixed; tokens signed
/// with any other algorithm fail verification.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Option<String>,
}

impl TokenCodec {
    /// An empty secret counts as unconfigured.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    fn secret(&self) -> Result<&str, AuthError> {
        self.secret.as_deref().ok_or(AuthError::Misconfigured)
    }

    /// Issue a signed token for the principal, valid for `ttl` from now.
    pub fn issue(&self, principal: &Principal, ttl: Duration) -> Result<String, AuthError> {
        let secret = self.secret()?;
        let claims = Claims {
            id: principal.id.clone(),
            role: principal.role,
            exp: (Utc::now() + ttl).timestamp() as usize,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| {
            error!(error = %e, "JWT encoding failed");
            AuthError::Misconfigured
        })
    }

    /// Verify a token and extract its principal.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let secret = self.secret()?;
        let mut validation = Validation::new(Algorithm::HS256);
        // An expired token is expired; no grace window.
        validation.leeway = 0;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
            _ => AuthError::Malformed,
        })?;

        Ok(Principal {
            id: data.claims.id,
            role: data.claims.role,
        })
    }
}
