//! Long-lived connection to the server event stream.
//!
//! The client owns one background task per connection run. The task opens the
//! stream, dispatches events to the registered handlers and reconnects with
//! exponential backoff, resuming from the last timestamp it has seen. It stops
//! when [`EventStreamClient::disconnect`] is called, when the session ends or
//! once the retry budget is spent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use auth::{Credentials, EndReason, SessionManager, SessionStatus};
use futures_util::StreamExt;
use log::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::cursor::StreamCursor;
use crate::dispatch::{Dispatcher, EventHandler};
use crate::error::Error;
use crate::event::{ForceLogout, Frame, StreamEvent, FORCE_LOGOUT_EVENT};
use crate::state::{ConnectionState, StateCell};
use crate::transport::{FrameStream, SseTransport, StreamRequest, Transport};

/// Path of the event stream below the API base URL.
pub const STREAM_PATH: &str = "/events/stream";

/// The session a stream connection authenticates as.
pub trait SessionSource: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
    /// End the session because the stream reported it unusable.
    fn end_session(&self, reason: EndReason);
    fn subscribe(&self) -> watch::Receiver<SessionStatus>;
}

impl SessionSource for SessionManager {
    fn credentials(&self) -> Option<Credentials> {
        SessionManager::credentials(self)
    }

    fn end_session(&self, reason: EndReason) {
        self.force_logout(reason)
    }

    fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        SessionManager::subscribe(self)
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub base_url: String,
    pub handshake_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl StreamSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            handshake_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

enum Outcome {
    /// The connection failed or closed; retry.
    Dropped,
    /// The session is gone; stop without retrying.
    SessionEnded,
    /// Another run owns the state now.
    Superseded,
}

pub struct EventStreamClient {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    settings: StreamSettings,
    transport: Arc<dyn Transport>,
    session: Arc<dyn SessionSource>,
    dispatcher: RwLock<Dispatcher>,
    cursor: Mutex<StreamCursor>,
    state: StateCell,
    unavailable: AtomicBool,
}

impl EventStreamClient {
    pub fn new(
        settings: StreamSettings,
        transport: Arc<dyn Transport>,
        session: Arc<dyn SessionSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                transport,
                session,
                dispatcher: RwLock::new(Dispatcher::new()),
                cursor: Mutex::new(StreamCursor::new()),
                state: StateCell::new(),
                unavailable: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Client using server-sent events over HTTP.
    pub fn with_sse(settings: StreamSettings, session: Arc<dyn SessionSource>) -> Self {
        Self::new(settings, Arc::new(SseTransport::new()), session)
    }

    /// Register `handler` for events named `name`.
    pub fn on(&self, name: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.shared.dispatcher_mut().on(name, handler);
    }

    /// Register `handler` for every event.
    pub fn on_any(&self, handler: Arc<dyn EventHandler>) {
        self.shared.dispatcher_mut().on_any(handler);
    }

    /// Start connecting in the background. Does nothing without a session or
    /// while a connection run is already active. Must be called inside a
    /// Tokio runtime.
    pub fn connect(&self) {
        if self.shared.session.credentials().is_none() {
            debug!("No active session, event stream not started");
            return;
        }
        let Some(generation) = self.shared.state.begin() else {
            debug!("Event stream already {}", self.shared.state.get());
            return;
        };

        self.shared.unavailable.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move { shared.run(generation).await });
        if let Some(previous) = self.task().replace(handle) {
            previous.abort();
        }
    }

    /// Close the connection and cancel any pending reconnect. Safe in any state.
    pub fn disconnect(&self) {
        if self.shared.state.disconnect() {
            info!("Event stream disconnected");
        }
        if let Some(handle) = self.task().take() {
            handle.abort();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn cursor(&self) -> StreamCursor {
        *self.shared.cursor()
    }

    /// Forget the resume position; the next connection replays from the start.
    pub fn reset_cursor(&self) {
        self.shared.cursor().reset();
    }

    /// True once the client gave up reconnecting. Cleared by the next
    /// [`EventStreamClient::connect`].
    pub fn live_updates_unavailable(&self) -> bool {
        self.shared.unavailable.load(Ordering::SeqCst)
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        if let Some(handle) = self.task().take() {
            handle.abort();
        }
    }
}

impl Shared {
    async fn run(self: Arc<Self>, generation: u64) {
        let mut status = self.session.subscribe();
        status.borrow_and_update();
        let mut backoff = Backoff::new(self.settings.backoff.clone());

        loop {
            let outcome = tokio::select! {
                outcome = self.attempt(generation, &mut backoff) => outcome,
                _ = session_ended(&mut status) => Outcome::SessionEnded,
            };
            match outcome {
                Outcome::Dropped => {}
                Outcome::SessionEnded => {
                    if self.state.finish(generation) {
                        info!("Session ended, event stream closed");
                    }
                    return;
                }
                Outcome::Superseded => return,
            }

            let Some(delay) = backoff.next_delay() else {
                if self.state.is_current(generation) {
                    warn!(
                        "Event stream failed {} times in a row, live updates unavailable",
                        backoff.failures()
                    );
                    self.unavailable.store(true, Ordering::SeqCst);
                    self.state.finish(generation);
                }
                return;
            };

            let retrying = self
                .state
                .advance(generation, ConnectionState::Open, ConnectionState::Retrying)
                || self.state.advance(
                    generation,
                    ConnectionState::Connecting,
                    ConnectionState::Retrying,
                );
            if !retrying {
                return;
            }
            info!(
                "Reconnecting event stream in {}s (retry {} of {})",
                delay.as_secs_f64(),
                backoff.failures(),
                self.settings.backoff.max_retries
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = session_ended(&mut status) => {
                    self.state.finish(generation);
                    return;
                }
            }
            if !self
                .state
                .advance(generation, ConnectionState::Retrying, ConnectionState::Connecting)
            {
                return;
            }
        }
    }

    async fn attempt(&self, generation: u64, backoff: &mut Backoff) -> Outcome {
        let Some(credentials) = self.session.credentials() else {
            return Outcome::SessionEnded;
        };
        let request = StreamRequest {
            url: self.stream_url(),
            credentials,
        };
        debug!("Opening event stream {}", request.url);

        let timeout = self.settings.handshake_timeout;
        let mut stream = match tokio::time::timeout(timeout, self.transport.connect(&request)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return self.refused(err),
            Err(_) => {
                warn!("Event stream handshake timed out after {}s", timeout.as_secs());
                return Outcome::Dropped;
            }
        };

        // A rejected request fails on its first item. A stream still silent
        // after the handshake timeout has been accepted with nothing to send.
        let first = match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            Ok(Some(Err(err))) => return self.refused(err),
            Ok(None) => {
                warn!("Event stream closed during the handshake");
                return Outcome::Dropped;
            }
            Err(_) => {
                debug!("Event stream quiet for {}s after connecting", timeout.as_secs());
                None
            }
        };

        if !self
            .state
            .advance(generation, ConnectionState::Connecting, ConnectionState::Open)
        {
            return Outcome::Superseded;
        }
        backoff.reset();
        info!("Event stream open");

        if let Some(frame) = first {
            if let Some(outcome) = self.receive(frame).await {
                return outcome;
            }
        }
        self.pump(stream).await
    }

    fn refused(&self, err: Error) -> Outcome {
        if let Some(reason) = err.end_reason() {
            warn!("Event stream rejected the session: {}", err);
            self.session.end_session(reason);
            return Outcome::SessionEnded;
        }
        warn!("Event stream connection failed: {}", err);
        Outcome::Dropped
    }

    async fn pump(&self, mut stream: FrameStream) -> Outcome {
        while let Some(item) = stream.next().await {
            let frame = match item {
                Ok(frame) => frame,
                Err(err) => {
                    if let Some(reason) = err.end_reason() {
                        self.session.end_session(reason);
                        return Outcome::SessionEnded;
                    }
                    warn!("Event stream dropped: {}", err);
                    return Outcome::Dropped;
                }
            };
            if let Some(outcome) = self.receive(frame).await {
                return outcome;
            }
        }

        info!("Event stream closed by the server");
        Outcome::Dropped
    }

    /// Handle one frame. Returns the outcome when the frame ends the connection.
    async fn receive(&self, frame: Frame) -> Option<Outcome> {
        if frame.is_keep_alive() {
            trace!("Event stream keep-alive");
            return None;
        }
        let Frame::Event { name, data, id } = frame else {
            return None;
        };

        let event = StreamEvent::from_frame(name, &data, id);
        self.cursor().advance(event.ts);
        self.dispatch(&event).await;

        if event.name == FORCE_LOGOUT_EVENT {
            let reason = event
                .payload_as::<ForceLogout>()
                .ok()
                .and_then(|body| body.reason)
                .unwrap_or_else(|| "no reason given".to_string());
            warn!("Server ended the session: {}", reason);
            self.session.end_session(EndReason::Revoked);
            return Some(Outcome::SessionEnded);
        }
        None
    }

    async fn dispatch(&self, event: &StreamEvent) {
        let handlers = self
            .dispatcher
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .handlers_for(&event.name);
        if handlers.is_empty() {
            trace!("No handler for {}", event.name);
        }
        for handler in handlers {
            handler.handle(event).await;
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}{}?last_event_ts={}",
            self.settings.base_url.trim_end_matches('/'),
            STREAM_PATH,
            *self.cursor()
        )
    }

    fn cursor(&self) -> MutexGuard<'_, StreamCursor> {
        self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatcher_mut(&self) -> std::sync::RwLockWriteGuard<'_, Dispatcher> {
        self.dispatcher
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolves once the session is no longer active.
async fn session_ended(status: &mut watch::Receiver<SessionStatus>) {
    loop {
        if status.changed().await.is_err() {
            return;
        }
        if !matches!(*status.borrow_and_update(), SessionStatus::Active) {
            return;
        }
    }
}
