//! # live
//!
//! Real-time updates for the dashboard client:
//! - a reconnecting server-sent event stream bound to the current session
//! - a monotonic resume cursor so reconnects replay missed events
//! - routing of events to handlers, including cache invalidation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use live::{client::{EventStreamClient, StreamSettings}, invalidation::{InvalidationHandler, StaleKeys}};
//!
//! let stream = EventStreamClient::with_sse(StreamSettings::new(base_url), manager.clone());
//! stream.on_any(Arc::new(InvalidationHandler::new(Arc::new(StaleKeys::new()))));
//! stream.connect();
//! ```

pub mod backoff;
pub mod client;
pub mod cursor;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod invalidation;
pub mod state;
pub mod transport;

pub use client::{EventStreamClient, SessionSource, StreamSettings};
pub use error::{Error, ErrorKind};
pub use event::StreamEvent;
pub use state::ConnectionState;
