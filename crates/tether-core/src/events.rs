//! Local event emitter.
//!
//! The bind/trigger surface models and collections expose. Backend handles
//! re-emit synced notifications through it, and backend bindings subscribe
//! to apply the corresponding mutations.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Handler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// An event emitter.
///
/// Handlers for one event run in registration order. `trigger` snapshots
/// the handler list before invoking, so handlers may bind further handlers
/// or trigger further events without deadlocking.
#[derive(Default)]
pub struct Events {
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl Events {
    /// Create an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event.
    pub fn bind<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Trigger an event, invoking every bound handler with `args`.
    pub fn trigger(&self, event: &str, args: &[Value]) {
        let snapshot: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap()
            .get(event)
            .cloned()
            .unwrap_or_default();

        for handler in snapshot {
            handler(args);
        }
    }

    /// Number of handlers bound to an event.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .get(event)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_and_trigger() {
        let events = Events::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        events.bind("change", move |args| {
            sink.lock().unwrap().push(args.to_vec());
        });

        events.trigger("change", &[json!({"id": 1})]);
        events.trigger("other", &[json!(null)]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec![json!({"id": 1})]);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let events = Events::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let sink = order.clone();
            events.bind("tick", move |_| sink.lock().unwrap().push(i));
        }

        events.trigger("tick", &[]);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_reentrant_bind_does_not_deadlock() {
        let events = Arc::new(Events::new());

        let reentrant = events.clone();
        events.bind("first", move |_| {
            reentrant.bind("second", |_| {});
        });

        events.trigger("first", &[]);
        assert_eq!(events.handler_count("second"), 1);
    }
}
