//! HMAC-signed OAuth state blobs
//!
//! The state is `base64url(json) + "." + hex(hmac-sha256(payload))`, signed
//! with the server secret. TTL is 600 seconds. Verification is constant
//! time via the Mac itself.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

pub const STATE_TTL_SECONDS: i64 = 600;

#[derive(Debug, Serialize, Deserialize)]
pub struct OauthState {
    pub iat: i64,
    pub next: String,
}

fn sign_payload(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Mint a signed state blob carrying the post-login redirect path.
pub fn generate(secret: &str, next_path: Option<&str>) -> String {
    let body = OauthState {
        iat: Utc::now().timestamp(),
        next: next_path.unwrap_or("/profile").to_string(),
    };
    let json = serde_json::to_string(&body).expect("state body serializes");
    let payload = URL_SAFE_NO_PAD.encode(json.as_bytes());
    let signature = sign_payload(secret, &payload);
    format!("{payload}.{signature}")
}

/// Verify the signature and TTL, returning the embedded state.
pub fn validate(secret: &str, state: &str) -> Result<OauthState, AuthError> {
    let (payload, signature) = state.split_once('.').ok_or(AuthError::InvalidState)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    let signature_bytes = hex::decode(signature).map_err(|_| AuthError::InvalidStateSignature)?;
    mac.verify_slice(&signature_bytes)
        .map_err(|_| AuthError::InvalidStateSignature)?;

    let json = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .map_err(|_| AuthError::InvalidStatePayload)?;
    let body: OauthState =
        serde_json::from_slice(&json).map_err(|_| AuthError::InvalidStatePayload)?;

    if Utc::now().timestamp() - body.iat > STATE_TTL_SECONDS {
        return Err(AuthError::StateExpired);
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn state_round_trips() {
        let state = generate(SECRET, Some("/dashboard"));
        let body = validate(SECRET, &state).unwrap();
        assert_eq!(body.next, "/dashboard");
    }

    #[test]
    fn default_next_is_profile() {
        let state = generate(SECRET, None);
        assert_eq!(validate(SECRET, &state).unwrap().next, "/profile");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let state = generate(SECRET, Some("/dashboard"));
        let (payload, signature) = state.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::json!({"iat": Utc::now().timestamp(), "next": "https://evil.example"})
                .to_string(),
        );
        assert!(validate(SECRET, &format!("{forged}.{signature}")).is_err());
        assert!(validate(SECRET, payload).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let state = generate(SECRET, None);
        assert_eq!(
            validate("other-secret", &state).unwrap_err(),
            AuthError::InvalidStateSignature
        );
    }

    #[test]
    fn expired_state_is_rejected() {
        let body = OauthState {
            iat: Utc::now().timestamp() - STATE_TTL_SECONDS - 5,
            next: "/profile".to_string(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_string(&body).unwrap());
        let signature = sign_payload(SECRET, &payload);
        assert_eq!(
            validate(SECRET, &format!("{payload}.{signature}")).unwrap_err(),
            AuthError::StateExpired
        );
    }
}
