//! Fan-out of notifications to registered listeners.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use tracing::error;

use crate::events::Event;

type ListenerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type Listener = Arc<dyn Fn(Event) -> ListenerFuture + Send + Sync + 'static>;

/// Holds the registered listeners and schedules each invocation as its own
/// task. Ordering between listeners for one event is unspecified, and a
/// listener that panics is reported without disturbing the others or the
/// read loop.
pub struct Dispatcher {
    listeners: RwLock<Vec<Listener>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Registers an async listener invoked for every notification.
    pub fn add_listener<F, Fut>(&self, listener: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: Listener = Arc::new(move |event| Box::pin(listener(event)));
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    /// Fires an event at every listener, each on its own task. Never blocks
    /// on listener completion.
    pub fn dispatch(&self, event: Event) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in listeners {
            let future = listener(event.clone());
            tokio::spawn(async move {
                if let Err(panic) = AssertUnwindSafe(future).catch_unwind().await {
                    error!(panic = panic_message(&panic), "event listener panicked");
                }
            });
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
