//! Authentication and token lifecycle core
//!
//! Covers the OAuth state blob, access/refresh token rotation, signed share
//! links, and API key issuance. All signing keys derive from the single
//! configured server secret.

use thiserror::Error;

pub mod api_keys;
pub mod oauth_state;
pub mod share;
pub mod tokens;

/// Errors raised by token parsing and verification.
///
/// The display strings double as the discriminating API messages, so keep
/// them stable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid OAuth state")]
    InvalidState,

    #[error("Invalid OAuth state signature")]
    InvalidStateSignature,

    #[error("Invalid OAuth state payload")]
    InvalidStatePayload,

    #[error("OAuth state expired")]
    StateExpired,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Invalid share token")]
    InvalidShareToken,

    #[error("Share token expired")]
    ShareTokenExpired,

    #[error("Invalid share token payload")]
    InvalidShareTokenPayload,

    #[error("{0}")]
    InvalidShareTtl(String),

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}
