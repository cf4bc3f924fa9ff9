//! Watches the session token's expiry, raises the renewal prompt inside the
//! warning window and ends the session once the token is unusable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::*;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Error;
use crate::manager::SessionManager;
use crate::session::{EndReason, Session, SessionStatus};

/// Floor applied to [`ExpirySettings::poll_interval`].
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ExpirySettings {
    pub poll_interval: Duration,
    pub warning_window: Duration,
}

impl Default for ExpirySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            warning_window: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryState {
    Quiet,
    /// The token expires at `expires_at` and renewal should be offered.
    Warning { expires_at: DateTime<Utc> },
}

pub struct ExpiryMonitor {
    manager: Arc<SessionManager>,
    settings: ExpirySettings,
    state: watch::Sender<ExpiryState>,
}

impl ExpiryMonitor {
    pub fn new(manager: Arc<SessionManager>, settings: ExpirySettings) -> Self {
        let (state, _) = watch::channel(ExpiryState::Quiet);
        Self {
            manager,
            settings,
            state,
        }
    }

    pub fn state(&self) -> ExpiryState {
        *self.state.borrow()
    }

    /// Receivers are notified once per transition, so a subscriber that shows
    /// a prompt on `Warning` shows it once per warning period.
    pub fn subscribe(&self) -> watch::Receiver<ExpiryState> {
        self.state.subscribe()
    }

    /// Countdown to expiry while in `Warning`.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.state() {
            ExpiryState::Warning { expires_at } => {
                Some((expires_at - now).to_std().unwrap_or(Duration::ZERO))
            }
            ExpiryState::Quiet => None,
        }
    }

    /// Evaluate the current session against `now` and apply the outcome.
    ///
    /// Inside the warning window a newer session stored by another process
    /// is adopted before warning or signing out.
    pub fn check_at(&self, now: DateTime<Utc>) -> ExpiryState {
        let Some(mut session) = self.manager.current_session() else {
            return self.transition(ExpiryState::Quiet);
        };

        let window = chrono::Duration::from_std(self.settings.warning_window)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        if session.remaining_at(now) <= window {
            if let Some(adopted) = self.manager.adopt_stored(now) {
                session = adopted;
            }
        }

        let remaining = session.remaining_at(now);
        if remaining <= chrono::Duration::zero() {
            info!("Session token expired at {}, signing out", session.expires_at());
            self.manager.force_logout(EndReason::Expired);
            return self.transition(ExpiryState::Quiet);
        }

        if remaining <= window {
            self.transition(ExpiryState::Warning {
                expires_at: session.expires_at(),
            })
        } else {
            self.transition(ExpiryState::Quiet)
        }
    }

    /// The renew action offered with the warning. A failed renewal signs out.
    pub async fn renew(&self) -> Result<Session, Error> {
        match self.manager.refresh().await {
            Ok(session) => {
                info!("Session renewed until {}", session.expires_at());
                self.transition(ExpiryState::Quiet);
                Ok(session)
            }
            Err(err) => {
                warn!("Session renewal failed: {}", err);
                if self.manager.current_session().is_some() {
                    self.manager.force_logout(EndReason::Expired);
                }
                self.transition(ExpiryState::Quiet);
                Err(err)
            }
        }
    }

    /// Poll until there is no session any more. Dropping the future stops the timer.
    pub async fn run(&self) {
        let period = self.settings.poll_interval.max(MIN_POLL_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status = self.manager.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_at(Utc::now());
                    if self.manager.current_session().is_none() {
                        break;
                    }
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if matches!(*status.borrow_and_update(), SessionStatus::Ended(_)) {
                        self.transition(ExpiryState::Quiet);
                        break;
                    }
                }
            }
        }
        debug!("Expiry monitor stopped");
    }

    fn transition(&self, next: ExpiryState) -> ExpiryState {
        self.state.send_if_modified(|state| match (*state, next) {
            // Already warning: refresh the countdown target silently.
            (ExpiryState::Warning { .. }, ExpiryState::Warning { .. }) => {
                *state = next;
                false
            }
            (current, next) if current == next => false,
            (_, next) => {
                if let ExpiryState::Warning { expires_at } = next {
                    info!("Session expires at {}, renewal available", expires_at);
                }
                *state = next;
                true
            }
        });
        next
    }
}
