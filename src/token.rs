//! Read-only inspection of JWT-shaped tokens.
//!
//! Signatures are not checked here; the backend remains the only judge of
//! validity. The claims are used to avoid sending tokens that have visibly
//! expired already.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use time::OffsetDateTime;

/// Claims the client cares about. Unknown claims are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[non_exhaustive]
pub struct UnverifiedClaims {
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
}

impl UnverifiedClaims {
    /// Expiry instant, if the token carries a usable `exp`.
    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.exp
            .and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
    }
}

/// Decodes the payload segment of a `header.payload.signature` token.
///
/// Returns `None` for opaque tokens or malformed payloads.
#[must_use]
pub fn decode_claims(token: &str) -> Option<UnverifiedClaims> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry instant of a JWT-shaped token.
#[must_use]
pub fn expires_at(token: &str) -> Option<OffsetDateTime> {
    decode_claims(token)?.expires_at()
}

/// `true` only when the token carries an `exp` at or before `now`.
///
/// Opaque tokens are never considered expired.
#[must_use]
pub fn is_expired_at(token: &str, now: OffsetDateTime) -> bool {
    expires_at(token).is_some_and(|exp| exp <= now)
}

#[must_use]
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, OffsetDateTime::now_utc())
}

#[cfg(test)]
pub(crate) fn fake_jwt(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}
