//! Account tokens handed out by register and login.
//!
//! Tokens are HS256 JWTs carrying the user's `id` and `username`.  The node
//! only issues them; nothing on the node requires one yet, but clients keep
//! them as proof of the account they registered.

use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use survcom_core::{now_millis, UserRecord};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign account token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("account token rejected: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

/// Claims inside an account token.  Times are Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountClaims {
    pub id: String,
    pub username: String,
    pub iat: u64,
    pub exp: u64,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            lifetime,
        }
    }

    /// Issuer keyed with a fresh random secret.
    pub fn with_random_secret(lifetime: Duration) -> Self {
        let secret = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        Self::new(secret.as_bytes(), lifetime)
    }

    /// # Errors
    ///
    /// Returns [`TokenError::Sign`] if the claims cannot be encoded.
    pub fn issue(&self, user: &UserRecord) -> Result<String, TokenError> {
        let iat = now_millis() / 1000;
        let claims = AccountClaims {
            id: user.id.clone(),
            username: user.username.clone(),
            iat,
            exp: iat.saturating_add(self.lifetime.as_secs()),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(TokenError::Sign)
    }

    /// Checks the signature and expiry of `token`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] for a bad signature, a malformed token
    /// or an expired one.
    pub fn verify(&self, token: &str) -> Result<AccountClaims, TokenError> {
        decode::<AccountClaims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(TokenError::Invalid)
    }
}
