//! Decoding of the claims embedded in an access token.
//!
//! The payload segment of the JWT is read without verifying the signature: the
//! client only needs the expiry to schedule renewal, and the server verifies
//! every token it receives. Callers go through [`decode_claims`] only, so a
//! verified decode can replace this one without touching them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Claims the session lifecycle relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    exp: f64,
    iat: Option<f64>,
    sub: Option<String>,
    role: Option<String>,
}

/// Decode the payload of `token`. Returns `None` for anything that is not a
/// three-segment token with a JSON payload carrying a numeric `exp`.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let raw: RawClaims = serde_json::from_slice(&bytes).ok()?;

    Some(Claims {
        expires_at: timestamp(raw.exp)?,
        issued_at: raw.iat.and_then(timestamp),
        subject: raw.sub,
        role: raw.role,
    })
}

fn timestamp(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
}
