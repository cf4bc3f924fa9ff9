//! The authenticated session and the signals published about it.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::claims::Claims;

/// Authenticated identity and token material for the current user on this device.
///
/// Fields are read-only outside the crate; only a refresh may replace the
/// token and expiry, and it does so by building a new value.
#[derive(Debug, Clone)]
pub struct Session {
    token: SecretString,
    user_id: String,
    email: String,
    role: String,
    plan: Option<String>,
    device_fingerprint: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    payment_confirmed: bool,
}

/// User record returned next to the access token on login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub payment_confirmed: bool,
}

fn default_role() -> String {
    "user".to_string()
}

impl Session {
    pub(crate) fn new(
        token: String,
        claims: &Claims,
        user: UserProfile,
        device_fingerprint: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            token: SecretString::new(token),
            role: claims.role.clone().unwrap_or(user.role),
            user_id: user.id,
            email: user.email,
            plan: user.plan,
            device_fingerprint,
            issued_at: claims.issued_at.unwrap_or(now),
            expires_at: claims.expires_at,
            payment_confirmed: user.payment_confirmed,
        }
    }

    /// Copy of this session carrying a renewed token. Identity fields are kept.
    pub(crate) fn renewed(&self, token: String, claims: &Claims) -> Self {
        Self {
            token: SecretString::new(token),
            issued_at: claims.issued_at.unwrap_or(self.issued_at),
            expires_at: claims.expires_at,
            ..self.clone()
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    pub fn device_fingerprint(&self) -> &str {
        &self.device_fingerprint
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn payment_confirmed(&self) -> bool {
        self.payment_confirmed
    }

    /// Time left before the token expires; negative once it has.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Token and fingerprint to attach to an authenticated request.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            token: self.token.clone(),
            fingerprint: self.device_fingerprint.clone(),
        }
    }

    pub(crate) fn same_token(&self, other: &Session) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
    }

    pub(crate) fn to_stored(&self) -> StoredSession {
        StoredSession {
            token: self.token.expose_secret().clone(),
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            plan: self.plan.clone(),
            device_fingerprint: self.device_fingerprint.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            payment_confirmed: self.payment_confirmed,
        }
    }

    pub(crate) fn token_value(&self) -> &str {
        self.token.expose_secret()
    }
}

/// On-disk form of a [`Session`], owned by the primary slot.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredSession {
    pub(crate) token: String,
    pub(crate) user_id: String,
    pub(crate) email: String,
    pub(crate) role: String,
    pub(crate) plan: Option<String>,
    pub(crate) device_fingerprint: String,
    pub(crate) issued_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) payment_confirmed: bool,
}

impl From<StoredSession> for Session {
    fn from(stored: StoredSession) -> Self {
        Self {
            token: SecretString::new(stored.token),
            user_id: stored.user_id,
            email: stored.email,
            role: stored.role,
            plan: stored.plan,
            device_fingerprint: stored.device_fingerprint,
            issued_at: stored.issued_at,
            expires_at: stored.expires_at,
            payment_confirmed: stored.payment_confirmed,
        }
    }
}

/// Bearer token plus device fingerprint, as sent on authenticated requests.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: SecretString,
    pub fingerprint: String,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LoggedOut,
    Expired,
    Unauthorized,
    FingerprintMismatch,
    /// The server pushed a `force_logout` event.
    Revoked,
}

/// Lifecycle signal published by the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Absent,
    Active,
    Ended(EndReason),
}
