//! Transports that open the server-sent event stream.

use async_trait::async_trait;
use auth::http::FINGERPRINT_HEADER;
use auth::Credentials;
use eventsource_client::{self as es, Client};
use futures_util::stream::{BoxStream, StreamExt};
use log::*;
use secrecy::ExposeSecret;

use crate::error::{transport_error, Error, TransportErrorKind};
use crate::event::Frame;

pub type FrameStream = BoxStream<'static, Result<Frame, Error>>;

/// Everything needed to open one connection.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub credentials: Credentials,
}

/// Opens one connection per call; reconnecting is the caller's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start one request. A transport that learns the response status before
    /// returning reports a rejection here; otherwise the rejection is the
    /// first item of the stream.
    async fn connect(&self, request: &StreamRequest) -> Result<FrameStream, Error>;
}

/// Server-sent events over HTTP via `eventsource-client`, with its own
/// reconnect logic switched off.
#[derive(Debug, Default, Clone)]
pub struct SseTransport;

impl SseTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self, request: &StreamRequest) -> Result<FrameStream, Error> {
        let bearer = format!("Bearer {}", request.credentials.token.expose_secret());
        let builder = es::ClientBuilder::for_url(&request.url)
            .and_then(|builder| builder.header("Authorization", &bearer))
            .and_then(|builder| {
                builder.header(FINGERPRINT_HEADER, &request.credentials.fingerprint)
            })
            .map_err(|e| {
                transport_error(TransportErrorKind::InvalidRequest, &format!("{e:?}"))
            })?
            .reconnect(es::ReconnectOptions::reconnect(false).build());

        // Plain HTTP skips loading the TLS root store.
        let client: Box<dyn Client> = if request.url.starts_with("https://") {
            Box::new(builder.build())
        } else {
            Box::new(builder.build_http())
        };
        debug!("Requesting event stream {}", request.url);

        // The request goes out when the stream is first polled.
        let events = client
            .stream()
            .map(|item| item.map(frame).map_err(Error::from));
        Ok(events.boxed())
    }
}

fn frame(sse: es::SSE) -> Frame {
    match sse {
        es::SSE::Event(event) => Frame::Event {
            name: event.event_type,
            data: event.data,
            id: event.id,
        },
        es::SSE::Comment(_) => Frame::Comment,
    }
}
