//! Boundary check deciding whether a navigation is authenticated.
//!
//! Reads only the gate slot, never the primary session, the way request-time
//! route protection sees the token without access to client state.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::*;

use crate::claims::decode_claims;
use crate::store::{FileSlot, Slot, GATE_TOKEN_FILE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow { subject: Option<String> },
    /// Send the user to sign in.
    Redirect,
}

pub struct RouteGate {
    slot: Box<dyn Slot>,
}

impl RouteGate {
    pub fn new(slot: Box<dyn Slot>) -> Self {
        Self { slot }
    }

    /// Gate reading the token file inside the state directory.
    pub fn on_disk(dir: &Path) -> Self {
        Self::new(Box::new(FileSlot::new(dir.join(GATE_TOKEN_FILE))))
    }

    pub fn check_at(&self, now: DateTime<Utc>) -> GateDecision {
        let token = match self.slot.load() {
            Ok(Some(token)) => token,
            Ok(None) => return GateDecision::Redirect,
            Err(e) => {
                warn!("Gate token unreadable: {}", e);
                return GateDecision::Redirect;
            }
        };

        match decode_claims(token.trim()) {
            Some(claims) if claims.expires_at > now => GateDecision::Allow {
                subject: claims.subject,
            },
            _ => GateDecision::Redirect,
        }
    }
}
