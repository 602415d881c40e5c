//! Signed share tokens
//!
//! A share token is a JWT scoped to the `devlens-share` audience whose `jti`
//! references a persisted row. Both the signature and the row must validate
//! for access.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;
use crate::config::AuthConfig;

pub const SHARE_TOKEN_AUDIENCE: &str = "devlens-share";

#[derive(Debug, Serialize, Deserialize)]
pub struct ShareClaims {
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: String,
}

/// Compute the expiry for a share link, bounded to 1..=30 days.
pub fn share_token_expiry(
    config: &AuthConfig,
    ttl_days: Option<i64>,
) -> Result<DateTime<Utc>, AuthError> {
    let ttl = ttl_days.unwrap_or(config.share_token_ttl_days);
    if ttl <= 0 {
        return Err(AuthError::InvalidShareTtl(
            "ttl_days must be greater than 0".to_string(),
        ));
    }
    if ttl > 30 {
        return Err(AuthError::InvalidShareTtl(
            "ttl_days must be <= 30".to_string(),
        ));
    }
    Ok(Utc::now() + Duration::days(ttl))
}

pub fn create_share_token(
    config: &AuthConfig,
    repo_id: Uuid,
    share_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<String, AuthError> {
    let claims = ShareClaims {
        sub: repo_id.to_string(),
        aud: SHARE_TOKEN_AUDIENCE.to_string(),
        iat: Utc::now().timestamp(),
        exp: expires_at.timestamp(),
        jti: share_id.to_string(),
        typ: "share".to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AuthError::Encoding(e.to_string()))
}

pub fn decode_share_token(config: &AuthConfig, token: &str) -> Result<ShareClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[SHARE_TOKEN_AUDIENCE]);
    let claims = decode::<ShareClaims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::ShareTokenExpired,
        _ => AuthError::InvalidShareToken,
    })?;

    if claims.typ != "share" {
        return Err(AuthError::InvalidShareToken);
    }
    if claims.sub.is_empty() || claims.jti.is_empty() {
        return Err(AuthError::InvalidShareTokenPayload);
    }
    Ok(claims)
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
    fn share_token_round_trips() {
        let config = test_config();
        let repo_id = Uuid::new_v4();
        let share_id = Uuid::new_v4();
        let expires = share_token_expiry(&config, None).unwrap();
        let token = create_share_token(&config, repo_id, share_id, expires).unwrap();
        let claims = decode_share_token(&config, &token).unwrap();
        assert_eq!(claims.sub, repo_id.to_string());
        assert_eq!(claims.jti, share_id.to_string());
        assert_eq!(claims.typ, "share");
    }

    #[test]
    fn expired_share_token_is_discriminated() {
        let config = test_config();
        let token = create_share_token(
            &config,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now() - Duration::days(1),
        )
        .unwrap();
        assert_eq!(
            decode_share_token(&config, &token).unwrap_err(),
            AuthError::ShareTokenExpired
        );
    }

    #[test]
    fn access_token_is_not_a_share_token() {
        let config = test_config();
        let access = super::super::tokens::create_access_token(&config, Uuid::new_v4()).unwrap();
        // Wrong audience fails validation outright.
        assert_eq!(
            decode_share_token(&config, &access).unwrap_err(),
            AuthError::InvalidShareToken
        );
    }

    #[test]
    fn ttl_bounds_are_enforced() {
        let config = test_config();
        assert!(share_token_expiry(&config, Some(0)).is_err());
        assert!(share_token_expiry(&config, Some(31)).is_err());
        assert!(share_token_expiry(&config, Some(1)).is_ok());
        assert!(share_token_expiry(&config, Some(30)).is_ok());
    }
}
