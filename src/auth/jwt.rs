//! JWT Token Handler
//! Mission: Mint and validate bearer tokens securely

use crate::auth::models::{Claims, Role};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use tracing::debug;

/// Token verification failure kinds, surfaced distinctly so callers can
/// report expiry separately from forgery.
#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Malformed,
    BadSignature,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Expired => write!(f, "token expired"),
            TokenError::Malformed => write!(f, "token malformed"),
            TokenError::BadSignature => write!(f, "token signature invalid"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Issues and validates HS256 bearer tokens under the process signing secret.
pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String, expiration_hours: i64) -> Self {
        Self {
            secret,
            expiration_hours,
        }
    }

    /// Mint a token for `username` with the configured TTL.
    pub fn mint(&self, username: &str, role: Role) -> Result<String> {
        self.mint_with_ttl(username, role, self.expiration_hours * 3600)
    }

    fn mint_with_ttl(&self, username: &str, role: Role, ttl_seconds: i64) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            role,
            iat: now as usize,
            exp: (now + ttl_seconds) as usize,
        };

        debug!(username, ttl_seconds, "Minting bearer token");

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to mint token")
    }

    /// Validate a token and extract its claims. Only HS256 is accepted.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::BadSignature,
            _ => TokenError::Malformed,
        })?;

        Ok(decoded.claims)
    }
}
