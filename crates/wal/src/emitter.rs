use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use sa_engine_domain::run::EventSink;
use sa_engine_domain::Event;
use tokio::sync::broadcast;

use crate::backend::{event_to_line, WalBackend};

type Hook = Box<dyn Fn(&Event) + Send + Sync>;

/// The sole event funnel. Every produced event flows through
/// `emit`, which appends to the WAL, invokes hooks in registration order,
/// then broadcasts to active streams. The WAL append is the authoritative
/// record; hook panics are caught and logged, never propagated.
pub struct WalEmitter {
    backend: Arc<dyn WalBackend>,
    hooks: RwLock<Vec<Hook>>,
    tx: broadcast::Sender<Event>,
}

impl WalEmitter {
    pub fn new(backend: Arc<dyn WalBackend>) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self { backend, hooks: RwLock::new(Vec::new()), tx }
    }

    /// Register a hook invoked synchronously, in registration order, on
    /// every emitted event.
    pub fn add_hook(&self, hook: Hook) {
        self.hooks.write().push(hook);
    }

    /// Subscribe to the live event stream (for SSE gateways or test
    /// assertions).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        match event_to_line(&event) {
            Ok(line) => {
                if let Err(e) = self.backend.append_line(&line) {
                    tracing::error!(error = %e, "WAL append failed");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "event failed to serialize; not appended to WAL");
            }
        }

        for hook in self.hooks.read().iter() {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| hook(&event)));
            if let Err(_panic) = result {
                tracing::error!("WAL hook panicked; suppressed");
            }
        }

        // No active subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

impl EventSink for WalEmitter {
    fn emit(&self, event: Event) {
        WalEmitter::emit(self, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryWalBackend;
    use sa_engine_domain::event::{EventKind, RunCancelledPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cancelled_event(run_id: &str) -> Event {
        Event::new(run_id, EventKind::RunCancelled(RunCancelledPayload { message: "m".into(), wal_locator: "l".into() }))
    }

    #[test]
    fn emit_appends_to_backend() {
        let backend = Arc::new(MemoryWalBackend::default());
        let emitter = WalEmitter::new(backend.clone());
        emitter.emit(cancelled_event("r1"));
        assert_eq!(backend.read_all().unwrap().len(), 1);
    }

    #[test]
    fn hooks_fire_in_registration_order() {
        let backend = Arc::new(MemoryWalBackend::default());
        let emitter = WalEmitter::new(backend);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o1 = order.clone();
        emitter.add_hook(Box::new(move |_| o1.lock().push(1)));
        let o2 = order.clone();
        emitter.add_hook(Box::new(move |_| o2.lock().push(2)));
        emitter.emit(cancelled_event("r1"));
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn panicking_hook_does_not_prevent_wal_append() {
        let backend = Arc::new(MemoryWalBackend::default());
        let emitter = WalEmitter::new(backend.clone());
        emitter.add_hook(Box::new(|_| panic!("boom")));
        let ran_after = Arc::new(AtomicUsize::new(0));
        let ran = ran_after.clone();
        emitter.add_hook(Box::new(move |_| { ran.fetch_add(1, Ordering::SeqCst); }));
        emitter.emit(cancelled_event("r1"));
        assert_eq!(backend.read_all().unwrap().len(), 1);
        assert_eq!(ran_after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_events() {
        let backend = Arc::new(MemoryWalBackend::default());
        let emitter = WalEmitter::new(backend);
        let mut rx = emitter.subscribe();
        emitter.emit(cancelled_event("r1"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.run_id, "r1");
    }
}
