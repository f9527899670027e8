//! JWT payload decoding.
//!
//! Signatures are never verified here; the only claim the client relies on
//! is `exp`. Any malformed token is treated as invalid.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token format")]
    InvalidFormat,
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Claims the client reads from an access token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JwtClaims {
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
}

/// Decode the payload segment of `token`.
pub fn decode_claims(token: &str) -> Result<JwtClaims, JwtError> {
    // JWT format: header.payload.signature
    let mut parts = token.split('.');
    let payload_b64 = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => p,
        _ => return Err(JwtError::InvalidFormat),
    };

    let bytes = decode_segment(payload_b64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Expiry of `token` in Unix milliseconds, or `None` if it cannot be decoded.
pub fn expires_at_ms(token: &str) -> Option<i64> {
    decode_claims(token)
        .ok()
        .and_then(|claims| claims.exp.checked_mul(1000))
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let unpadded = segment.trim_end_matches('=');
    // Issuers differ on alphabet; accept both.
    URL_SAFE_NO_PAD
        .decode(unpadded)
        .or_else(|_| STANDARD_NO_PAD.decode(unpadded))
}
