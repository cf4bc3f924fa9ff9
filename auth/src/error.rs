//! Error types for the `auth` crate.
//!
//! Follows the same pattern as the other layers: a root Error struct holding an
//! optional source for chaining and a tree of error kind enums.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the auth crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the auth crate.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Session(SessionErrorKind),
    Storage(StorageErrorKind),
    Http(HttpErrorKind),
}

/// Errors from the session lifecycle. Every kind except `InvalidCredentials`,
/// `NoSession` and `InvalidToken` ends the current session.
#[derive(Debug, PartialEq)]
pub enum SessionErrorKind {
    InvalidCredentials,
    SessionExpired,
    Unauthorized,
    FingerprintMismatch,
    NoSession,
    InvalidToken,
}

/// Errors from the persistence slots.
#[derive(Debug, PartialEq)]
pub enum StorageErrorKind {
    Read,
    Write,
    Corrupt,
}

/// Errors from HTTP client operations.
#[derive(Debug, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    RequestFailed,
    Timeout,
    Network,
    Status(u16),
    InvalidResponse,
}

impl Error {
    /// True when the error means the local session was (or must be) torn down.
    pub fn ends_session(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::Session(
                SessionErrorKind::SessionExpired
                    | SessionErrorKind::Unauthorized
                    | SessionErrorKind::FingerprintMismatch
            )
        )
    }

    /// Message safe to show to a user. Never contains server response bodies.
    pub fn user_message(&self) -> String {
        match &self.error_kind {
            // The reason for a rejected login is produced locally from the status code.
            ErrorKind::Session(SessionErrorKind::InvalidCredentials) => self
                .source
                .as_ref()
                .map(|reason| reason.to_string())
                .unwrap_or_else(|| "Invalid email or password.".to_string()),
            ErrorKind::Session(SessionErrorKind::SessionExpired) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ErrorKind::Session(SessionErrorKind::Unauthorized) => {
                "You have been signed out. Please sign in again.".to_string()
            }
            ErrorKind::Session(SessionErrorKind::FingerprintMismatch) => {
                "This session belongs to another device. Please sign in again.".to_string()
            }
            ErrorKind::Session(SessionErrorKind::NoSession) => "You are not signed in.".to_string(),
            ErrorKind::Session(SessionErrorKind::InvalidToken) | ErrorKind::Http(_) => {
                "The service returned an unexpected response. Please try again.".to_string()
            }
            ErrorKind::Storage(_) => "Local session data could not be saved.".to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Session(kind) => write!(f, "Session error: {:?}", kind),
            ErrorKind::Storage(kind) => write!(f, "Storage error: {:?}", kind),
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_timeout() {
            ErrorKind::Http(HttpErrorKind::Timeout)
        } else if err.is_decode() {
            ErrorKind::Http(HttpErrorKind::InvalidResponse)
        } else if err.is_request() {
            ErrorKind::Http(HttpErrorKind::RequestFailed)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            other => Error {
                source: Some(Box::new(other)),
                error_kind: ErrorKind::Http(HttpErrorKind::Network),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Corrupt),
        }
    }
}

/// Helper function to create session errors.
pub fn session_error(kind: SessionErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Session(kind),
    }
}

/// Helper function to create storage errors wrapping an I/O failure.
pub fn storage_error(kind: StorageErrorKind, err: std::io::Error) -> Error {
    Error {
        source: Some(Box::new(err)),
        error_kind: ErrorKind::Storage(kind),
    }
}

/// Helper function to create HTTP errors.
pub fn http_error(kind: HttpErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Http(kind),
    }
}
