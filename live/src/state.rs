//! Connection state of the event stream and its legal transitions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Retrying,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition. Any state may drop to
    /// `Disconnected`; everything else follows the connect/retry cycle.
    pub fn can_become(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Open)
                | (Connecting, Retrying)
                | (Open, Retrying)
                | (Retrying, Connecting)
                | (Connecting | Open | Retrying, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Retrying => "retrying",
        };
        f.write_str(name)
    }
}

/// The single owner of a client's [`ConnectionState`].
///
/// Every connection run gets a generation number from [`StateCell::begin`].
/// Transitions are compare-and-advance and carry that generation, so a run
/// that was superseded or disconnected cannot move the state any more.
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
    generation: AtomicU64,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            tx,
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Start a run: `Disconnected -> Connecting`. Returns the run's generation,
    /// or `None` when a run is already active.
    pub(crate) fn begin(&self) -> Option<u64> {
        let mut started = None;
        self.tx.send_if_modified(|state| {
            if *state != ConnectionState::Disconnected {
                return false;
            }
            *state = ConnectionState::Connecting;
            started = Some(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
            true
        });
        started
    }

    /// Move from `from` to `to` on behalf of run `generation`. Returns false,
    /// leaving the state untouched, when the run is stale, the current state
    /// is not `from` or the transition is illegal. Leaving `Disconnected` is
    /// reserved to [`StateCell::begin`].
    pub(crate) fn advance(
        &self,
        generation: u64,
        from: ConnectionState,
        to: ConnectionState,
    ) -> bool {
        self.tx.send_if_modified(|state| {
            let legal = from != ConnectionState::Disconnected && from.can_become(to);
            if legal && self.is_current(generation) && *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// End run `generation`, if it is still the current one.
    pub(crate) fn finish(&self, generation: u64) -> bool {
        self.tx.send_if_modified(|state| {
            if self.is_current(generation) && *state != ConnectionState::Disconnected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        })
    }

    /// Drop to `Disconnected` from wherever the state is, ending the current run.
    pub(crate) fn disconnect(&self) -> bool {
        self.tx.send_if_modified(|state| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            if *state == ConnectionState::Disconnected {
                false
            } else {
                *state = ConnectionState::Disconnected;
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn test_cycle_transitions_are_legal() {
        assert!(Disconnected.can_become(Connecting));
        assert!(Connecting.can_become(Open));
        assert!(Open.can_become(Retrying));
        assert!(Retrying.can_become(Connecting));
        assert!(Open.can_become(Disconnected));
    }

    #[test]
    fn test_shortcuts_are_illegal() {
        assert!(!Disconnected.can_become(Open));
        assert!(!Retrying.can_become(Open));
        assert!(!Open.can_become(Connecting));
        assert!(!Disconnected.can_become(Retrying));
    }

    #[test]
    fn test_advance_requires_expected_state() {
        let cell = StateCell::new();
        assert!(!cell.advance(0, Disconnected, Connecting));

        let run = cell.begin().unwrap();
        assert!(!cell.advance(run, Connecting, Connecting));
        assert!(!cell.advance(run, Open, Retrying));
        assert!(cell.advance(run, Connecting, Open));
        assert_eq!(cell.get(), Open);
    }

    #[test]
    fn test_only_begin_leaves_disconnected() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();

        for generation in 0..3 {
            assert!(!cell.advance(generation, Disconnected, Connecting));
        }

        assert_eq!(cell.get(), Disconnected);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_begin_only_from_disconnected() {
        let cell = StateCell::new();
        assert!(cell.begin().is_some());
        assert!(cell.begin().is_none());
    }

    #[test]
    fn test_stale_run_cannot_move_state() {
        let cell = StateCell::new();
        let old = cell.begin().unwrap();
        cell.disconnect();
        let new = cell.begin().unwrap();

        assert!(!cell.advance(old, Connecting, Open));
        assert!(!cell.finish(old));
        assert_eq!(cell.get(), Connecting);
        assert!(cell.advance(new, Connecting, Open));
    }

    #[test]
    fn test_disconnect_from_any_state() {
        let cell = StateCell::new();
        assert!(!cell.disconnect());

        cell.begin();
        let mut rx = cell.subscribe();
        assert!(cell.disconnect());

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Disconnected);
    }
}
