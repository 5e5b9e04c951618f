// SPDX-License-Identifier: Apache-2.0

//! Message-id -> handler table (spec §4.6, "Dispatcher").
//!
//! Registration happens at startup, before the server starts; the table
//! is immutable thereafter, so concurrent worker threads read it without
//! any lock. A missing id logs at warning and drops the message - the
//! dispatcher itself never invokes `catch_unwind`, since spec §4.6 places
//! that responsibility "at the worker boundary" (see `relay-worker`).

use bytes::Bytes;
use relay_logging::log_warn;
use relay_session::SessionHandle;
use std::collections::HashMap;
use std::sync::Arc;

const TARGET: &str = "relay_dispatcher";

/// A registered message handler: `(session, id, payload) -> ()`.
pub type Handler = Arc<dyn Fn(SessionHandle, u16, Bytes) + Send + Sync>;

/// Builds an immutable [`Dispatcher`] by registering handlers before the
/// server starts.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<u16, Handler>,
}

impl DispatcherBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `id`, replacing any prior registration for
    /// the same id.
    pub fn register(
        &mut self,
        id: u16,
        handler: impl Fn(SessionHandle, u16, Bytes) + Send + Sync + 'static,
    ) {
        self.handlers.insert(id, Arc::new(handler));
    }

    /// Finalizes the table into an immutable [`Dispatcher`].
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// An immutable id -> handler table, safe to share across worker threads
/// via `Arc` with no locking on the read path.
pub struct Dispatcher {
    handlers: HashMap<u16, Handler>,
}

impl Dispatcher {
    /// Looks up the handler registered for `id`, if any. Callers invoke it
    /// themselves (typically wrapped in `catch_unwind` at the worker
    /// boundary); a missing id is logged here at warning, matching spec
    /// §4.6/§7's "Protocol" error policy.
    #[must_use]
    pub fn lookup(&self, id: u16) -> Option<Handler> {
        let handler = self.handlers.get(&id).cloned();
        if handler.is_none() {
            log_warn!(TARGET, "no handler registered for message id {id}; dropping message");
        }
        handler
    }

    /// Number of registered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_session::{Deregister, Session, SessionId};
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::sync::Weak;

    struct NullDeregister;
    impl Deregister for NullDeregister {
        fn deregister(&self, _id: SessionId) {}
    }

    fn dangling() -> Weak<dyn Deregister> {
        let strong: Arc<dyn Deregister> = Arc::new(NullDeregister);
        Arc::downgrade(&strong)
    }

    #[test]
    fn lookup_finds_a_registered_handler() {
        let mut builder = DispatcherBuilder::new();
        let seen = Arc::new(AtomicU16::new(0));
        let seen_clone = Arc::clone(&seen);
        builder.register(1001, move |_session, id, _payload| {
            seen_clone.store(id, Ordering::SeqCst);
        });
        let dispatcher = builder.build();

        let handler = dispatcher.lookup(1001).expect("handler should be registered");
        let (session, _rx) = Session::new(dangling(), 1024);
        handler(session, 1001, Bytes::from_static(b"ping"));
        assert_eq!(seen.load(Ordering::SeqCst), 1001);
    }

    #[test]
    fn lookup_for_unknown_id_returns_none() {
        let dispatcher = DispatcherBuilder::new().build();
        assert!(dispatcher.lookup(9999).is_none());
    }

    #[test]
    fn later_registration_for_same_id_replaces_the_earlier_one() {
        let mut builder = DispatcherBuilder::new();
        builder.register(1, |_, _, _| {});
        let replaced = Arc::new(AtomicU16::new(0));
        let replaced_clone = Arc::clone(&replaced);
        builder.register(1, move |_, _, _| {
            replaced_clone.store(1, Ordering::SeqCst);
        });
        let dispatcher = builder.build();
        let handler = dispatcher.lookup(1).unwrap();
        let (session, _rx) = Session::new(dangling(), 1024);
        handler(session, 1, Bytes::new());
        assert_eq!(replaced.load(Ordering::SeqCst), 1);
    }
}
