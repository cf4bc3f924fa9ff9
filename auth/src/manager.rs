//! Session manager: login, refresh and logout against the `/auth` endpoints.

use std::sync::{Once, PoisonError, RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::*;
use reqwest::{Method, Response, StatusCode};
use reqwest_middleware::RequestBuilder;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::claims::decode_claims;
use crate::error::{http_error, session_error, Error, ErrorKind, HttpErrorKind, SessionErrorKind};
use crate::fingerprint::FingerprintGenerator;
use crate::http::{authorize, ClientBuilder, HttpClient, HttpClientConfig, FINGERPRINT_HEADER};
use crate::session::{Credentials, EndReason, Session, SessionStatus, UserProfile};
use crate::store::SessionStore;

/// Header a server may use to flag a device-binding violation on a 403.
pub const AUTH_ERROR_HEADER: &str = "X-Auth-Error";
/// Error code identifying a device-binding violation.
pub const FINGERPRINT_MISMATCH_CODE: &str = "FINGERPRINT_MISMATCH";

/// Connection settings for the session manager.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Backend base URL without a trailing slash.
    pub base_url: String,
    pub http: HttpClientConfig,
}

impl SessionSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: HttpClientConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    device_fingerprint: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    user: UserProfile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
}

/// The in-memory session plus a counter bumped every time a session begins or
/// ends, so an operation that suspended can tell whether it still applies.
#[derive(Default)]
struct Current {
    session: Option<Session>,
    epoch: u64,
}

/// Owns the session for this process.
///
/// The session is restored from the store on first access. It is only ever
/// replaced as a whole, under the write lock, after the store accepted it, so
/// readers see either no session or a complete one. `login`, `refresh` and
/// `logout` are serialized by an operation lock.
pub struct SessionManager {
    base_url: String,
    client: HttpClient,
    store: SessionStore,
    fingerprint: FingerprintGenerator,
    current: RwLock<Current>,
    restore: Once,
    operation_lock: Mutex<()>,
    status: watch::Sender<SessionStatus>,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        store: SessionStore,
        fingerprint: FingerprintGenerator,
    ) -> Result<Self, Error> {
        let client = ClientBuilder::new().with_config(settings.http).build()?;
        let (status, _) = watch::channel(SessionStatus::Absent);

        Ok(Self {
            base_url: settings.base_url,
            client,
            store,
            fingerprint,
            current: RwLock::new(Current::default()),
            restore: Once::new(),
            operation_lock: Mutex::new(()),
            status,
        })
    }

    /// Authenticate with email and password, binding the session to this device.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, Error> {
        let _guard = self.operation_lock.lock().await;
        self.ensure_restored();

        let fingerprint = self.fingerprint.get_or_create();
        let url = format!("{}/auth/login", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(FINGERPRINT_HEADER, fingerprint.as_str())
            .json(&LoginRequest {
                email,
                password,
                device_fingerprint: &fingerprint,
            })
            .send()
            .await
            .map_err(|e| {
                let err = Error::from(e);
                warn!("Login request failed: {}", err);
                let reason = if err.error_kind == ErrorKind::Http(HttpErrorKind::Timeout) {
                    "The sign-in request timed out. Please try again."
                } else {
                    "Unable to reach the server. Please try again."
                };
                session_error(SessionErrorKind::InvalidCredentials, reason)
            })?;

        let status = response.status();
        if !status.is_success() {
            info!("Login rejected with status {}", status);
            return Err(session_error(
                SessionErrorKind::InvalidCredentials,
                login_failure_reason(status),
            ));
        }

        let body: LoginResponse = response.json().await?;
        let claims = decode_claims(&body.access_token).ok_or_else(|| {
            session_error(
                SessionErrorKind::InvalidToken,
                "Access token carries no readable expiry",
            )
        })?;

        let session = Session::new(body.access_token, &claims, body.user, fingerprint, Utc::now());
        {
            let mut current = self.write_current();
            self.store.persist(&session)?;
            current.session = Some(session.clone());
            current.epoch += 1;
        }
        self.status.send_replace(SessionStatus::Active);

        info!(
            "Signed in as {} (expires at {})",
            session.user_id(),
            session.expires_at()
        );
        Ok(session)
    }

    /// Exchange the current token for a fresh one. Any failure ends the session.
    pub async fn refresh(&self) -> Result<Session, Error> {
        let _guard = self.operation_lock.lock().await;
        self.ensure_restored();

        let (session, epoch) = {
            let current = self.read_current();
            (current.session.clone(), current.epoch)
        };
        let Some(session) = session else {
            return Err(session_error(
                SessionErrorKind::SessionExpired,
                "There is no session to refresh",
            ));
        };

        match self.request_renewal(&session).await {
            Ok(renewed) => {
                let mut current = self.write_current();
                if current.epoch != epoch || current.session.is_none() {
                    return Err(session_error(
                        SessionErrorKind::SessionExpired,
                        "Session ended while the refresh was in flight",
                    ));
                }
                self.store.persist(&renewed)?;
                current.session = Some(renewed.clone());
                drop(current);

                debug!("Session renewed until {}", renewed.expires_at());
                Ok(renewed)
            }
            Err(err) => {
                warn!("Token refresh failed: {}", err);
                if err.error_kind == ErrorKind::Session(SessionErrorKind::FingerprintMismatch) {
                    self.end_if_current(epoch, EndReason::FingerprintMismatch);
                    return Err(err);
                }
                if let Some(adopted) = self.adopt_stored(Utc::now()) {
                    return Ok(adopted);
                }
                self.end_if_current(epoch, EndReason::Expired);
                Err(Error {
                    source: Some(Box::new(err)),
                    error_kind: ErrorKind::Session(SessionErrorKind::SessionExpired),
                })
            }
        }
    }

    /// Best-effort server notification followed by unconditional local teardown.
    pub async fn logout(&self) {
        let _guard = self.operation_lock.lock().await;

        if let Some(session) = self.current_session() {
            let url = format!("{}/auth/logout", self.base_url);
            match authorize(self.client.post(&url), &session.credentials())
                .send()
                .await
            {
                Ok(response) if !response.status().is_success() => {
                    debug!("Server answered logout with {}", response.status());
                }
                Ok(_) => {}
                Err(e) => warn!("Logout notification failed, clearing locally: {}", e),
            }
        }

        self.force_logout(EndReason::LoggedOut);
    }

    /// Tear the session down locally without contacting the server.
    ///
    /// Signing out empties the store. Any other ending empties it only while
    /// it still holds this process's token.
    pub fn force_logout(&self, reason: EndReason) {
        self.ensure_restored();
        let had_session = {
            let mut current = self.write_current();
            let ended = current.session.take();
            current.epoch += 1;
            let cleared = match (&ended, reason) {
                (_, EndReason::LoggedOut) => self.store.clear(),
                (Some(session), _) => self.store.clear_if_token(session.token_value()).map(drop),
                (None, _) => Ok(()),
            };
            if let Err(e) = cleared {
                error!("Failed to clear persisted session: {}", e);
            }
            ended.is_some()
        };

        if had_session {
            info!("Session ended: {:?}", reason);
        }
        self.status.send_if_modified(|status| {
            let ended = SessionStatus::Ended(reason);
            if *status == ended {
                false
            } else {
                *status = ended;
                true
            }
        });
    }

    /// Switch to the stored session when another process sharing the state
    /// directory persisted a newer one for this device that is still valid
    /// at `now`. Only a live session is replaced.
    pub fn adopt_stored(&self, now: DateTime<Utc>) -> Option<Session> {
        self.ensure_restored();
        let stored = match self.store.load() {
            Ok(stored) => stored?,
            Err(e) => {
                warn!("Could not read the stored session: {}", e);
                return None;
            }
        };
        if stored.remaining_at(now) <= chrono::Duration::zero()
            || stored.device_fingerprint() != self.fingerprint.get_or_create()
        {
            return None;
        }

        let mut current = self.write_current();
        let newer = current.session.as_ref().is_some_and(|session| {
            !session.same_token(&stored) && stored.expires_at() > session.expires_at()
        });
        if !newer {
            return None;
        }
        current.session = Some(stored.clone());
        current.epoch += 1;
        drop(current);

        info!(
            "Adopted the session renewed by another process (expires at {})",
            stored.expires_at()
        );
        Some(stored)
    }

    pub fn current_session(&self) -> Option<Session> {
        self.ensure_restored();
        self.read_current().session.clone()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.current_session().map(|session| session.credentials())
    }

    pub fn status(&self) -> SessionStatus {
        self.ensure_restored();
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.ensure_restored();
        self.status.subscribe()
    }

    pub fn fingerprint(&self) -> String {
        self.fingerprint.get_or_create()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request builder for `path` carrying the current credentials.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, Error> {
        let credentials = self
            .credentials()
            .ok_or_else(|| session_error(SessionErrorKind::NoSession, "Not signed in"))?;
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Ok(authorize(self.client.request(method, &url), &credentials))
    }

    /// Send an authenticated request. A rejection of the session ends it.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, Error> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let err = rejection(response).await;
        match err.error_kind {
            ErrorKind::Session(SessionErrorKind::Unauthorized) => {
                self.force_logout(EndReason::Unauthorized)
            }
            ErrorKind::Session(SessionErrorKind::FingerprintMismatch) => {
                self.force_logout(EndReason::FingerprintMismatch)
            }
            _ => {}
        }
        Err(err)
    }

    async fn request_renewal(&self, session: &Session) -> Result<Session, Error> {
        let url = format!("{}/auth/refresh", self.base_url);
        let response = authorize(self.client.post(&url), &session.credentials())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: RefreshResponse = response.json().await?;
        let claims = decode_claims(&body.access_token).ok_or_else(|| {
            session_error(
                SessionErrorKind::InvalidToken,
                "Renewed token carries no readable expiry",
            )
        })?;
        Ok(session.renewed(body.access_token, &claims))
    }

    fn end_if_current(&self, epoch: u64, reason: EndReason) {
        if self.read_current().epoch == epoch {
            self.force_logout(reason);
        }
    }

    fn ensure_restored(&self) {
        self.restore.call_once(|| match self.store.load() {
            Ok(Some(session)) => {
                info!("Restored session for {}", session.user_id());
                let mut current = self.write_current();
                current.session = Some(session);
                current.epoch += 1;
                drop(current);
                self.status.send_replace(SessionStatus::Active);
            }
            Ok(None) => {
                if let Err(e) = self.store.clear() {
                    warn!("Failed to clear leftover session data: {}", e);
                }
            }
            Err(e) => {
                warn!("Discarding unreadable persisted session: {}", e);
                if let Err(e) = self.store.clear() {
                    warn!("Failed to clear unreadable session data: {}", e);
                }
            }
        });
    }

    fn read_current(&self) -> std::sync::RwLockReadGuard<'_, Current> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_current(&self) -> RwLockWriteGuard<'_, Current> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sanitized, user-facing reason for a rejected login.
fn login_failure_reason(status: StatusCode) -> &'static str {
    match status {
        StatusCode::TOO_MANY_REQUESTS => "Too many sign-in attempts. Please wait and try again.",
        s if s.is_server_error() => "The service is unavailable. Please try again later.",
        _ => "Invalid email or password.",
    }
}

/// Classify a non-success response from an authenticated endpoint.
pub(crate) async fn rejection(response: Response) -> Error {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return session_error(SessionErrorKind::Unauthorized, "Server rejected the session");
    }

    if status == StatusCode::FORBIDDEN {
        let flagged = response
            .headers()
            .get(AUTH_ERROR_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case(FINGERPRINT_MISMATCH_CODE));
        let coded = flagged
            || response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.code)
                .is_some_and(|code| code == FINGERPRINT_MISMATCH_CODE);
        if coded {
            return session_error(
                SessionErrorKind::FingerprintMismatch,
                "Session is bound to another device",
            );
        }
    }

    http_error(
        HttpErrorKind::Status(status.as_u16()),
        &format!("Request failed with status {}", status),
    )
}
