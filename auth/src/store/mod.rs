//! Session persistence across the primary and gate slots.
//!
//! The primary slot holds the full session and is read only by this client.
//! The gate slot holds the bare token for the boundary that decides whether a
//! navigation is authenticated (see [`crate::gate::RouteGate`]). Both slots
//! are written by [`SessionStore::persist`] and emptied by
//! [`SessionStore::clear`] or [`SessionStore::clear_if_token`]; nothing else
//! writes them.

mod slot;

use std::path::Path;

use log::*;

pub use slot::{FileSlot, MemorySlot, Slot};

use crate::error::Error;
use crate::session::{Session, StoredSession};

/// File name of the primary slot inside the state directory.
pub const SESSION_FILE: &str = "session.json";
/// File name of the gate slot inside the state directory.
pub const GATE_TOKEN_FILE: &str = "auth_token";
/// File name of the device fingerprint slot inside the state directory.
pub const FINGERPRINT_FILE: &str = "device_fingerprint";

pub struct SessionStore {
    primary: Box<dyn Slot>,
    gate: Box<dyn Slot>,
}

impl SessionStore {
    pub fn new(primary: Box<dyn Slot>, gate: Box<dyn Slot>) -> Self {
        Self { primary, gate }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemorySlot::new()), Box::new(MemorySlot::new()))
    }

    /// Store rooted at `dir`, using [`SESSION_FILE`] and [`GATE_TOKEN_FILE`].
    pub fn on_disk(dir: &Path) -> Self {
        Self::new(
            Box::new(FileSlot::new(dir.join(SESSION_FILE))),
            Box::new(FileSlot::new(dir.join(GATE_TOKEN_FILE))),
        )
    }

    /// Write `session` to both slots. If the gate write fails the primary is
    /// restored to its previous value so the two never disagree.
    pub fn persist(&self, session: &Session) -> Result<(), Error> {
        let previous = self.primary.load()?;
        let serialized = serde_json::to_string(&session.to_stored())?;
        self.primary.save(&serialized)?;

        if let Err(e) = self.gate.save(session.token_value()) {
            warn!("Gate slot write failed, restoring primary slot: {}", e);
            let restored = match previous {
                Some(value) => self.primary.save(&value),
                None => self.primary.clear(),
            };
            if let Err(restore_err) = restored {
                error!("Failed to restore primary slot: {}", restore_err);
            }
            return Err(e);
        }

        Ok(())
    }

    /// Read the persisted session. A primary value without the matching gate
    /// token is inconsistent and is reported as absent.
    pub fn load(&self) -> Result<Option<Session>, Error> {
        let Some(serialized) = self.primary.load()? else {
            return Ok(None);
        };
        let stored: StoredSession = serde_json::from_str(&serialized)?;
        match self.gate.load()? {
            Some(token) if token == stored.token => Ok(Some(stored.into())),
            _ => {
                warn!("Persisted session has no matching gate token; ignoring it");
                Ok(None)
            }
        }
    }

    /// Empty both slots. Both are attempted even if the first one fails.
    pub fn clear(&self) -> Result<(), Error> {
        let primary = self.primary.clear();
        let gate = self.gate.clear();
        primary.and(gate)
    }

    /// Empty both slots unless the gate slot holds a token other than
    /// `token`. Another process sharing the state directory may have stored a
    /// newer session since `token` was written; that session is left alone.
    /// Returns whether the slots were emptied.
    pub fn clear_if_token(&self, token: &str) -> Result<bool, Error> {
        match self.gate.load()? {
            Some(stored) if stored != token => {
                debug!("Stored session was replaced by another process; keeping it");
                Ok(false)
            }
            _ => self.clear().map(|()| true),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::claims::decode_claims;
    use crate::claims::tests::token_with;
    use crate::error::{ErrorKind, StorageErrorKind};
    use crate::session::UserProfile;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    /// Slot shared between the store under test and the assertions.
    #[derive(Clone, Default)]
    pub(crate) struct SharedSlot(pub(crate) Arc<MemorySlot>);

    impl Slot for SharedSlot {
        fn load(&self) -> Result<Option<String>, Error> {
            self.0.load()
        }
        fn save(&self, value: &str) -> Result<(), Error> {
            self.0.save(value)
        }
        fn clear(&self) -> Result<(), Error> {
            self.0.clear()
        }
    }

    struct BrokenSlot;

    impl Slot for BrokenSlot {
        fn load(&self) -> Result<Option<String>, Error> {
            Ok(None)
        }
        fn save(&self, _value: &str) -> Result<(), Error> {
            Err(crate::error::storage_error(
                StorageErrorKind::Write,
                std::io::Error::other("disk full"),
            ))
        }
        fn clear(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    pub(crate) fn sample_session(user_id: &str) -> Session {
        let exp = Utc::now().timestamp() + 3600;
        let token = token_with(json!({ "sub": user_id, "exp": exp }));
        let claims = decode_claims(&token).unwrap();
        let user = UserProfile {
            id: user_id.to_string(),
            email: format!("{user_id}@example.com"),
            role: "user".to_string(),
            plan: Some("growth".to_string()),
            payment_confirmed: true,
        };
        Session::new(token, &claims, user, "fp".to_string(), Utc::now())
    }

    #[test]
    fn test_persist_writes_both_slots() {
        let primary = SharedSlot::default();
        let gate = SharedSlot::default();
        let store = SessionStore::new(Box::new(primary.clone()), Box::new(gate.clone()));
        let session = sample_session("u1");

        store.persist(&session).unwrap();

        assert!(primary.load().unwrap().is_some());
        assert_eq!(gate.load().unwrap().as_deref(), Some(session.token_value()));
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.user_id(), "u1");
        assert_eq!(loaded.plan(), Some("growth"));
        assert!(loaded.same_token(&session));
    }

    #[test]
    fn test_failed_gate_write_rolls_back_primary() {
        let primary = SharedSlot::default();
        let store = SessionStore::new(Box::new(primary.clone()), Box::new(BrokenSlot));

        let err = store.persist(&sample_session("u1")).unwrap_err();

        assert_eq!(err.error_kind, ErrorKind::Storage(StorageErrorKind::Write));
        assert_eq!(primary.load().unwrap(), None);
    }

    #[test]
    fn test_primary_without_gate_token_loads_as_absent() {
        let primary = SharedSlot::default();
        let gate = SharedSlot::default();
        let store = SessionStore::new(Box::new(primary.clone()), Box::new(gate.clone()));
        store.persist(&sample_session("u1")).unwrap();

        gate.clear().unwrap();

        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_clear_empties_both_slots() {
        let primary = SharedSlot::default();
        let gate = SharedSlot::default();
        let store = SessionStore::new(Box::new(primary.clone()), Box::new(gate.clone()));
        store.persist(&sample_session("u1")).unwrap();

        store.clear().unwrap();

        assert_eq!(primary.load().unwrap(), None);
        assert_eq!(gate.load().unwrap(), None);
    }

    #[test]
    fn test_clear_if_token_keeps_a_replaced_session() {
        let primary = SharedSlot::default();
        let gate = SharedSlot::default();
        let store = SessionStore::new(Box::new(primary.clone()), Box::new(gate.clone()));
        let ours = sample_session("u1");
        store.persist(&ours).unwrap();
        let theirs = sample_session("u2");
        store.persist(&theirs).unwrap();

        assert!(!store.clear_if_token(ours.token_value()).unwrap());
        assert_eq!(store.load().unwrap().unwrap().user_id(), "u2");

        assert!(store.clear_if_token(theirs.token_value()).unwrap());
        assert_eq!(primary.load().unwrap(), None);
        assert_eq!(gate.load().unwrap(), None);
    }
}
