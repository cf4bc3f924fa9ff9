//! # auth
//!
//! Device-bound session lifecycle for the dashboard backend:
//! - device fingerprint generation and caching
//! - session persistence across the primary and gate slots
//! - login, refresh and logout against the `/auth` endpoints
//! - expiry monitoring with a renewal window and forced logout
//! - authenticated access to the remaining API endpoints
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth::{
//!     fingerprint::{FingerprintGenerator, SystemSignals},
//!     manager::{SessionManager, SessionSettings},
//!     store::{FileSlot, SessionStore},
//! };
//!
//! let manager = SessionManager::new(settings, SessionStore::on_disk(dir), fingerprint)?;
//! let session = manager.login("ana@example.com", "secret").await?;
//! ```

pub mod api;
pub mod claims;
pub mod error;
pub mod expiry;
pub mod fingerprint;
pub mod gate;
pub mod http;
pub mod manager;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use error::{Error, ErrorKind, SessionErrorKind};
pub use manager::{SessionManager, SessionSettings};
pub use session::{Credentials, EndReason, Session, SessionStatus};
