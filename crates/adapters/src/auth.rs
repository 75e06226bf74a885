//! Password hashing and bearer tokens.
//!
//! Passwords are stored as Argon2id PHC strings. Sessions are HS256 JWTs
//! carrying the username; handlers that need a user take an [`AuthUser`].

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::http_server::AppState;

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal {
            reason: format!("password hashing failed: {}", e),
        })
}

/// Check a password against a stored hash. Unparseable hashes never match.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks session tokens
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl TokenIssuer {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    pub fn issue(&self, username: &str) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let claims = Claims {
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::hours(self.expiry_hours)).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| ApiError::Internal {
            reason: format!("token encoding failed: {}", e),
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::unauthorized("Token is invalid or expired"))
    }
}

/// The authenticated local user of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Token is missing"))?;
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();

        let claims = state.tokens.verify(token)?;
        match state.node.get_user(&claims.username)? {
            Some(user) => Ok(AuthUser(user.username)),
            None => Err(ApiError::unauthorized("User no longer exists")),
        }
    }
}
