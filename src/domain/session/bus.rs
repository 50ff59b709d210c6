//! Session event bus
//!
//! Synchronous, ordered delivery of session lifecycle events to local
//! subscribers. Handlers run in subscription order within one session's
//! turn-processing timeline; concurrent sessions each own an independent
//! bus. A handler that needs remote I/O must hand the event to the
//! notification dispatcher's queue and return immediately.

use crate::domain::session::event::SessionEvent;
use crate::domain::shared::result::Result;
use tracing::warn;

type EventHandler = Box<dyn Fn(&SessionEvent) -> Result<()> + Send + Sync>;

/// Per-session event bus
#[derive(Default)]
pub struct SessionEventBus {
    handlers: Vec<EventHandler>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; delivery order follows subscription order
    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: Fn(&SessionEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Deliver an event to every subscriber, in order
    ///
    /// Handler errors are logged and swallowed; they must never propagate
    /// into the turn-processing path and interrupt the live conversation.
    pub fn publish(&self, event: &SessionEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler(event) {
                warn!(kind = event.kind(), error = %e, "Event handler failed");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::error::DomainError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut bus = SessionEventBus::new();

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(move |_| {
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }

        bus.publish(&SessionEvent::Close);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_handler_error_does_not_stop_delivery() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let mut bus = SessionEventBus::new();

        bus.subscribe(|_| Err(DomainError::Internal("handler blew up".to_string())));
        let counter = delivered.clone();
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&SessionEvent::Error {
            message: "pipeline glitch".to_string(),
        });
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
