//! Routing of stream events to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::event::StreamEvent;

/// Receives events from the stream. Handlers run sequentially on the
/// connection task, so a slow handler delays the events behind it.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &StreamEvent);
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&StreamEvent) + Send + Sync,
{
    async fn handle(&self, event: &StreamEvent) {
        (self.0)(event)
    }
}

/// Wrap a synchronous closure as a handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&StreamEvent) + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handlers keyed by event name, plus handlers that see every event.
/// Delivery is in registration order.
#[derive(Default, Clone)]
pub struct Dispatcher {
    by_name: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    all: Vec<Arc<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, name: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.by_name.entry(name.into()).or_default().push(handler);
    }

    pub fn on_any(&mut self, handler: Arc<dyn EventHandler>) {
        self.all.push(handler);
    }

    /// Handlers interested in `name`: the named ones first, then the catch-all ones.
    pub fn handlers_for(&self, name: &str) -> Vec<Arc<dyn EventHandler>> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .chain(self.all.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(name: &str) -> StreamEvent {
        StreamEvent::from_frame(name.to_string(), r#"{"ts": 1}"#, None)
    }

    async fn deliver(dispatcher: &Dispatcher, event: &StreamEvent) {
        for handler in dispatcher.handlers_for(&event.name) {
            handler.handle(event).await;
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> Arc<dyn EventHandler> {
        let log = log.clone();
        handler_fn(move |event| {
            log.lock()
                .unwrap()
                .push(format!("{label}:{}", event.name))
        })
    }

    #[tokio::test]
    async fn test_named_handlers_only_see_their_event() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.on("report_ready", recorder(&log, "reports"));
        dispatcher.on("campaign_updated", recorder(&log, "campaigns"));

        deliver(&dispatcher, &event("report_ready")).await;

        assert_eq!(*log.lock().unwrap(), vec!["reports:report_ready"]);
    }

    #[tokio::test]
    async fn test_catch_all_runs_after_named_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.on_any(recorder(&log, "all"));
        dispatcher.on("report_ready", recorder(&log, "first"));
        dispatcher.on("report_ready", recorder(&log, "second"));

        deliver(&dispatcher, &event("report_ready")).await;
        deliver(&dispatcher, &event("unknown_event")).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:report_ready",
                "second:report_ready",
                "all:report_ready",
                "all:unknown_event"
            ]
        );
    }
}
