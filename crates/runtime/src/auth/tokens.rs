//! Access and refresh token lifecycle
//!
//! Access tokens are symmetric HS256 JWTs scoped to the `devlens-api`
//! audience. Refresh secrets are opaque random strings; only their SHA-256
//! hex digest ever touches the database.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::AuthError;
use crate::config::AuthConfig;

pub const ACCESS_TOKEN_AUDIENCE: &str = "devlens-api";
pub const REFRESH_COOKIE_NAME: &str = "devlens_refresh_token";
pub const CSRF_COOKIE_NAME: &str = "devlens_csrf_token";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: String,
}

pub fn create_access_token(config: &AuthConfig, user_id: Uuid) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = AccessClaims {
        sub: user_id.to_string(),
        aud: ACCESS_TOKEN_AUDIENCE.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(config.jwt_access_ttl_minutes)).timestamp(),
        typ: "access".to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AuthError::Encoding(e.to_string()))
}

pub fn decode_access_token(config: &AuthConfig, token: &str) -> Result<AccessClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[ACCESS_TOKEN_AUDIENCE]);
    decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidAccessToken)
}

/// Opaque refresh secret: 48 bytes of entropy, URL-safe encoded.
pub fn issue_refresh_token() -> String {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn refresh_expiry(config: &AuthConfig) -> DateTime<Utc> {
    Utc::now() + Duration::days(config.jwt_refresh_ttl_days)
}

/// Random 24-byte value for the double-submit CSRF cookie.
pub fn issue_csrf_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "unit-test-secret".to_string(),
            jwt_access_ttl_minutes: 15,
            jwt_refresh_ttl_days: 30,
            share_token_ttl_days: 7,
        }
    }

    #[test]
    fn access_token_round_trips() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = create_access_token(&config, user_id).unwrap();
        let claims = decode_access_token(&config, &token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.aud, ACCESS_TOKEN_AUDIENCE);
        assert_eq!(claims.typ, "access");
    }

    #[test]
    fn access_token_rejects_wrong_secret() {
        let config = test_config();
        let token = create_access_token(&config, Uuid::new_v4()).unwrap();
        let other = AuthConfig {
            jwt_secret: "different".to_string(),
            ..test_config()
        };
        assert_eq!(
            decode_access_token(&other, &token).unwrap_err(),
            AuthError::InvalidAccessToken
        );
    }

    #[test]
    fn refresh_tokens_are_long_and_unique() {
        let a = issue_refresh_token();
        let b = issue_refresh_token();
        assert_ne!(a, b);
        // 48 bytes of entropy -> 64 characters of URL-safe base64.
        assert!(a.len() >= 64);
        assert_eq!(hash_refresh_token(&a).len(), 64);
        assert_ne!(hash_refresh_token(&a), hash_refresh_token(&b));
    }
}
