//! Maps stream events to the cached query keys they make stale.
//!
//! Keys are `/`-separated paths such as `campaigns/c-42`. A pattern ending in
//! `/*` covers every key under its prefix. Routing is a pure lookup in
//! [`INVALIDATION_TABLE`]; marking a key stale twice is the same as marking it
//! once, so replayed events are harmless.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::*;
use serde_json::Value;

use crate::dispatch::EventHandler;
use crate::event::StreamEvent;

pub struct InvalidationRule {
    pub event: &'static str,
    /// Key patterns; `{field}` is filled from the event payload.
    pub keys: &'static [&'static str],
}

pub const INVALIDATION_TABLE: &[InvalidationRule] = &[
    InvalidationRule {
        event: "spend_estimate_updated",
        keys: &["spend-estimates/{domain}", "dashboard/summary"],
    },
    InvalidationRule {
        event: "campaign_updated",
        keys: &["campaigns/{campaign_id}", "campaigns/list", "dashboard/summary"],
    },
    InvalidationRule {
        event: "campaign_lift_ready",
        keys: &["campaign-lift/{campaign_id}", "campaigns/{campaign_id}"],
    },
    InvalidationRule {
        event: "meta_signals_scored",
        keys: &["meta-signals/{domain}", "dashboard/summary"],
    },
    InvalidationRule {
        event: "report_ready",
        keys: &["reports/{report_id}", "reports/list"],
    },
    InvalidationRule {
        event: "subscription_changed",
        keys: &["account/profile", "account/billing"],
    },
];

/// Key patterns invalidated by an event, in table order without duplicates.
/// Unknown events invalidate nothing. A placeholder whose field is missing
/// widens the key to everything under its prefix.
pub fn route(event_name: &str, payload: &Value) -> Vec<String> {
    let Some(rule) = INVALIDATION_TABLE.iter().find(|rule| rule.event == event_name) else {
        return Vec::new();
    };

    let mut keys = Vec::new();
    for pattern in rule.keys {
        let key = expand(pattern, payload);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn expand(pattern: &str, payload: &Value) -> String {
    let mut segments = Vec::new();
    for segment in pattern.split('/') {
        let Some(field) = segment
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
        else {
            segments.push(segment.to_string());
            continue;
        };

        match payload.get(field).and_then(field_value) {
            Some(value) => segments.push(value),
            None => {
                segments.push("*".to_string());
                break;
            }
        }
    }
    segments.join("/")
}

fn field_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(escape_segment(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Percent-escape the characters that carry meaning in a key pattern so a
/// payload value always lands in exactly one segment.
fn escape_segment(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            '*' => escaped.push_str("%2A"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Whether `pattern` covers `key`.
pub fn covers(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => {
            key == prefix
                || key
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        }
        None => pattern == key,
    }
}

/// The cache side of invalidation.
pub trait CacheInvalidator: Send + Sync {
    /// Mark everything `pattern` covers as stale. Returns true if this changed anything.
    fn invalidate(&self, pattern: &str) -> bool;
}

/// Record of stale key patterns. A key stays stale until it is re-fetched
/// and reported with [`StaleKeys::mark_fresh`].
#[derive(Debug, Default)]
pub struct StaleKeys {
    inner: Mutex<StaleSet>,
}

#[derive(Debug, Default)]
struct StaleSet {
    patterns: BTreeSet<String>,
    // Concrete keys re-fetched since a wildcard pattern covering them was recorded.
    fresh: BTreeSet<String>,
}

impl StaleKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stale(&self, key: &str) -> bool {
        let set = self.lock();
        !set.fresh.contains(key) && set.patterns.iter().any(|pattern| covers(pattern, key))
    }

    /// Record that `key` was re-fetched. An exact pattern for `key` is
    /// dropped; wildcard patterns stay in place for the other keys they cover.
    pub fn mark_fresh(&self, key: &str) {
        let mut set = self.lock();
        set.patterns.remove(key);
        if set.patterns.iter().any(|pattern| covers(pattern, key)) {
            set.fresh.insert(key.to_string());
        }
    }

    pub fn patterns(&self) -> Vec<String> {
        self.lock().patterns.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaleSet> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheInvalidator for StaleKeys {
    fn invalidate(&self, pattern: &str) -> bool {
        let mut set = self.lock();
        let before = set.fresh.len();
        set.fresh.retain(|key| !covers(pattern, key));
        let revived = set.fresh.len() != before;
        set.patterns.insert(pattern.to_string()) || revived
    }
}

/// Stream handler that applies [`route`] to every event it receives.
pub struct InvalidationHandler {
    cache: Arc<dyn CacheInvalidator>,
}

impl InvalidationHandler {
    pub fn new(cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl EventHandler for InvalidationHandler {
    async fn handle(&self, event: &StreamEvent) {
        let keys = route(&event.name, &event.payload);
        if keys.is_empty() {
            trace!("No cached keys depend on {}", event.name);
            return;
        }

        let changed = keys.iter().filter(|key| self.cache.invalidate(key)).count();
        debug!(
            "{} invalidated {} key(s), {} newly stale: {:?}",
            event.name,
            keys.len(),
            changed,
            keys
        );
    }
}
