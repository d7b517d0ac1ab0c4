use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::types::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: i64,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn new(account_id: i64, role: Role) -> Self {
        let now = Utc::now();
        let expiry_hours = config::config().security.jwt_expiry_hours;
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: account_id,
            role,
            exp,
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("JWT secret not configured")]
    SecretNotConfigured,

    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Password hashing error: {0}")]
    Hashing(String),
}

fn secret() -> Result<&'static str, AuthError> {
    let secret = config::config().security.jwt_secret.as_str();
    if secret.is_empty() {
        return Err(AuthError::SecretNotConfigured);
    }
    Ok(secret)
}

/// Sign an HS256 token for the given account
pub fn issue_token(account_id: i64, role: Role) -> Result<String, AuthError> {
    encode_claims(&Claims::new(account_id, role))
}

pub fn encode_claims(claims: &Claims) -> Result<String, AuthError> {
    let encoding_key = EncodingKey::from_secret(secret()?.as_bytes());
    encode(&Header::default(), claims, &encoding_key)
        .map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

/// Check signature and expiry, returning the decoded claims
pub fn verify_token(token: &str) -> Result<Claims, AuthError> {
    let decoding_key = DecodingKey::from_secret(secret()?.as_bytes());
    let validation = Validation::default();

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
}

pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    hash_password_with_cost(password, config::config().security.bcrypt_cost).await
}

pub async fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Compare a plaintext password with a stored bcrypt hash.
/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?;

    match outcome {
        Ok(matches) => Ok(matches),
        Err(e) => {
            tracing::warn!("Stored password hash could not be verified: {}", e);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_keeps_subject_and_role() {
        let token = issue_token(42, Role::Admin).unwrap();
        let claims = verify_token(&token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, Role::Admin);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = issue_token(7, Role::User).unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(verify_token(&tampered), Err(AuthError::InvalidToken(_))));
        assert!(matches!(verify_token("not-a-jwt"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let claims = Claims {
            sub: 1,
            role: Role::User,
            iat: (now - Duration::hours(3)).timestamp(),
            exp: (now - Duration::hours(2)).timestamp(),
            jti: Uuid::new_v4(),
        };
        let token = encode_claims(&claims).unwrap();
        assert!(matches!(verify_token(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn tokens_carry_distinct_ids() {
        let a = Claims::new(1, Role::Team);
        let b = Claims::new(1, Role::Team);
        assert_ne!(a.jti, b.jti);
    }

    #[tokio::test]
    async fn password_hash_verifies() {
        let hash = hash_password_with_cost("correct horse", 4).await.unwrap();
        assert!(verify_password("correct horse", &hash).await.unwrap());
        assert!(!verify_password("battery staple", &hash).await.unwrap());
        assert!(!verify_password("anything", "not-a-bcrypt-hash").await.unwrap());
    }
}
