//! Device fingerprint used to bind a session to this installation.

use std::env;
use std::sync::OnceLock;

use chrono::Local;
use log::*;
use sha2::{Digest, Sha256};

use crate::store::Slot;

/// Stand-in for an environment signal that could not be read.
pub const UNAVAILABLE: &str = "unavailable";

/// Longest user agent prefix that feeds the fingerprint.
pub const USER_AGENT_PREFIX_LEN: usize = 64;

/// Source of the environment characteristics a fingerprint is derived from.
/// Each probe returns `None` when the signal cannot be read.
pub trait SignalSource: Send + Sync {
    fn display(&self) -> Option<String>;
    fn locale(&self) -> Option<String>;
    fn timezone(&self) -> Option<String>;
    fn platform(&self) -> Option<String>;
    fn user_agent(&self) -> Option<String>;
    fn renderer(&self) -> Option<String>;
}

/// Signals read from the running process and its terminal.
#[derive(Debug, Clone)]
pub struct SystemSignals {
    user_agent: String,
}

impl SystemSignals {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl Default for SystemSignals {
    fn default() -> Self {
        Self::new(format!("pulse/{}", env!("CARGO_PKG_VERSION")))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl SignalSource for SystemSignals {
    fn display(&self) -> Option<String> {
        let columns = non_empty_var("COLUMNS")?;
        let lines = non_empty_var("LINES")?;
        Some(format!("{columns}x{lines}"))
    }

    fn locale(&self) -> Option<String> {
        non_empty_var("LC_ALL")
            .or_else(|| non_empty_var("LC_MESSAGES"))
            .or_else(|| non_empty_var("LANG"))
    }

    fn timezone(&self) -> Option<String> {
        non_empty_var("TZ").or_else(|| Some(Local::now().offset().to_string()))
    }

    fn platform(&self) -> Option<String> {
        Some(format!("{}-{}", env::consts::OS, env::consts::ARCH))
    }

    fn user_agent(&self) -> Option<String> {
        Some(self.user_agent.clone())
    }

    fn renderer(&self) -> Option<String> {
        let term = non_empty_var("TERM")?;
        Some(match non_empty_var("COLORTERM") {
            Some(color) => format!("{term}/{color}"),
            None => term,
        })
    }
}

/// Derive the fingerprint for a set of signals: lowercase hex SHA-256 over the
/// signals joined by `|`, in a fixed order.
pub fn compute(signals: &dyn SignalSource) -> String {
    let user_agent = signals
        .user_agent()
        .map(|ua| ua.chars().take(USER_AGENT_PREFIX_LEN).collect::<String>());

    let parts = [
        signals.display(),
        signals.locale(),
        signals.timezone(),
        signals.platform(),
        user_agent,
        signals.renderer(),
    ];

    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_deref().unwrap_or(UNAVAILABLE).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Computes the fingerprint once per installation and caches it in its own slot.
pub struct FingerprintGenerator {
    signals: Box<dyn SignalSource>,
    slot: Box<dyn Slot>,
    cached: OnceLock<String>,
}

impl FingerprintGenerator {
    pub fn new(signals: Box<dyn SignalSource>, slot: Box<dyn Slot>) -> Self {
        Self {
            signals,
            slot,
            cached: OnceLock::new(),
        }
    }

    /// Return the device fingerprint, creating and persisting it on first use.
    /// Never fails: slot errors are logged and the computed value is used.
    pub fn get_or_create(&self) -> String {
        self.cached
            .get_or_init(|| {
                match self.slot.load() {
                    Ok(Some(stored)) if !stored.trim().is_empty() => return stored.trim().to_string(),
                    Ok(_) => {}
                    Err(e) => warn!("Could not read cached device fingerprint: {}", e),
                }

                let fingerprint = compute(self.signals.as_ref());
                if let Err(e) = self.slot.save(&fingerprint) {
                    warn!("Could not cache device fingerprint: {}", e);
                }
                debug!("Created device fingerprint {}", &fingerprint[..12]);
                fingerprint
            })
            .clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemorySlot;

    #[derive(Clone)]
    pub(crate) struct FixedSignals {
        pub(crate) renderer: Option<String>,
        pub(crate) user_agent: String,
    }

    impl Default for FixedSignals {
        fn default() -> Self {
            Self {
                renderer: Some("xterm-256color".to_string()),
                user_agent: "pulse/test".to_string(),
            }
        }
    }

    impl SignalSource for FixedSignals {
        fn display(&self) -> Option<String> {
            Some("1920x1080".to_string())
        }
        fn locale(&self) -> Option<String> {
            Some("en_US.UTF-8".to_string())
        }
        fn timezone(&self) -> Option<String> {
            Some("Europe/Berlin".to_string())
        }
        fn platform(&self) -> Option<String> {
            Some("linux-x86_64".to_string())
        }
        fn user_agent(&self) -> Option<String> {
            Some(self.user_agent.clone())
        }
        fn renderer(&self) -> Option<String> {
            self.renderer.clone()
        }
    }

    pub(crate) fn fixed_generator() -> FingerprintGenerator {
        FingerprintGenerator::new(Box::new(FixedSignals::default()), Box::new(MemorySlot::new()))
    }

    #[test]
    fn test_repeated_calls_return_identical_output() {
        let generator = fixed_generator();
        let first = generator.get_or_create();
        let second = generator.get_or_create();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_identical_inputs_on_separate_generators_agree() {
        assert_eq!(
            fixed_generator().get_or_create(),
            fixed_generator().get_or_create()
        );
    }

    #[test]
    fn test_missing_signal_still_yields_deterministic_value() {
        let signals = FixedSignals {
            renderer: None,
            ..FixedSignals::default()
        };

        let first = compute(&signals);
        let second = compute(&signals);

        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert_ne!(first, compute(&FixedSignals::default()));
    }

    #[test]
    fn test_user_agent_is_truncated() {
        let base = "a".repeat(USER_AGENT_PREFIX_LEN);
        let short = FixedSignals {
            user_agent: base.clone(),
            ..FixedSignals::default()
        };
        let long = FixedSignals {
            user_agent: format!("{base}-with-a-changing-build-suffix"),
            ..FixedSignals::default()
        };

        assert_eq!(compute(&short), compute(&long));
    }

    #[test]
    fn test_cached_value_wins_over_current_signals() {
        let slot = MemorySlot::new();
        slot.save("previously-stored").unwrap();
        let generator = FingerprintGenerator::new(Box::new(FixedSignals::default()), Box::new(slot));

        assert_eq!(generator.get_or_create(), "previously-stored");
    }

    #[test]
    fn test_system_signals_always_produce_a_fingerprint() {
        let value = compute(&SystemSignals::default());
        assert_eq!(value.len(), 64);
    }
}
