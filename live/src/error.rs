//! Error types for the `live` crate.

use std::error::Error as StdError;
use std::fmt;

pub use auth::SessionErrorKind;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The stream endpoint rejected the session; the session must end.
    Session(SessionErrorKind),
    Transport(TransportErrorKind),
}

/// Failures of a single stream connection. All of them are retried.
#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    InvalidRequest,
    HandshakeTimeout,
    Rejected(u16),
    Closed,
    Stream,
}

impl Error {
    /// The end reason to apply to the session, if this error ends it.
    pub fn end_reason(&self) -> Option<auth::EndReason> {
        match self.error_kind {
            ErrorKind::Session(SessionErrorKind::Unauthorized) => {
                Some(auth::EndReason::Unauthorized)
            }
            ErrorKind::Session(SessionErrorKind::FingerprintMismatch) => {
                Some(auth::EndReason::FingerprintMismatch)
            }
            ErrorKind::Session(_) => Some(auth::EndReason::Expired),
            ErrorKind::Transport(_) => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{:?}: {}", self.error_kind, source),
            None => write!(f, "{:?}", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<eventsource_client::Error> for Error {
    fn from(err: eventsource_client::Error) -> Self {
        use eventsource_client::Error as EsError;

        let error_kind = match &err {
            EsError::UnexpectedResponse(status) => match status.as_u16() {
                401 => ErrorKind::Session(SessionErrorKind::Unauthorized),
                403 => ErrorKind::Session(SessionErrorKind::FingerprintMismatch),
                code => ErrorKind::Transport(TransportErrorKind::Rejected(code)),
            },
            EsError::TimedOut => ErrorKind::Transport(TransportErrorKind::HandshakeTimeout),
            EsError::Eof => ErrorKind::Transport(TransportErrorKind::Closed),
            _ => ErrorKind::Transport(TransportErrorKind::Stream),
        };
        Error {
            source: Some(format!("{err:?}").into()),
            error_kind,
        }
    }
}

pub fn transport_error(kind: TransportErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Transport(kind),
    }
}

pub fn session_error(kind: SessionErrorKind) -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Session(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_that_end_the_session() {
        assert_eq!(
            session_error(SessionErrorKind::Unauthorized).end_reason(),
            Some(auth::EndReason::Unauthorized)
        );
        assert_eq!(
            session_error(SessionErrorKind::FingerprintMismatch).end_reason(),
            Some(auth::EndReason::FingerprintMismatch)
        );
        assert_eq!(
            transport_error(TransportErrorKind::Rejected(503), "unavailable").end_reason(),
            None
        );
    }

    #[test]
    fn test_display_includes_source() {
        let err = transport_error(TransportErrorKind::Closed, "server closed the stream");
        assert_eq!(err.to_string(), "Transport(Closed): server closed the stream");
    }
}
