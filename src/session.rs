//! The session and processor contracts consumed by the chain.
//!
//! The chain does not implement sessions; it drives one through this trait.
//! Everything here mirrors what the chain actually touches: counters, the
//! write queue, the processor, the close future, and the typed attribute map
//! carrying the connect-future glue.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::Cause;
use crate::future::CloseFuture;
use crate::handler::IoHandler;
use crate::write::{Message, WriteRequestQueue};

/// Shared handle to a session.
pub type SessionRef = Arc<dyn Session>;

/// Which direction a session idled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleStatus {
    /// No inbound traffic for the configured interval.
    ReaderIdle,
    /// No outbound traffic for the configured interval.
    WriterIdle,
    /// No traffic in either direction.
    BothIdle,
}

/// Transport-side processor for a session.
///
/// The head filter calls `flush` after enqueueing a write and `remove` to
/// tear the session out of the transport on close.
pub trait Processor: Send + Sync {
    /// Flushes the session's write queue to the transport.
    fn flush(&self, session: &SessionRef);

    /// Detaches the session from the transport, closing it.
    fn remove(&self, session: &SessionRef);
}

/// The session surface the chain consumes.
///
/// Implementations must be thread-safe: the write queue, counters, close
/// future and attribute map are shared with the transport. The chain itself
/// only ever calls these from whichever thread drives its events.
pub trait Session: Send + Sync {
    /// Stable identifier, used in errors and logging.
    fn id(&self) -> u64;

    /// The application handler invoked at the tail.
    fn handler(&self) -> Arc<dyn IoHandler>;

    /// The transport processor invoked at the head.
    fn processor(&self) -> Arc<dyn Processor>;

    /// The outbound write-request queue.
    fn write_queue(&self) -> Arc<dyn WriteRequestQueue>;

    /// Whether writes are currently suspended; suppresses the head's flush.
    fn is_write_suspended(&self) -> bool;

    /// Whether the session hands received messages out as read futures.
    fn use_read_operation(&self) -> bool;

    /// Future settled when the session closes.
    fn close_future(&self) -> CloseFuture;

    /// The session's typed attribute map.
    fn attributes(&self) -> &AttributeMap;

    /// Closes the session, immediately when `force` is set.
    fn close(&self, force: bool);

    /// Records an idle period in the given direction.
    fn increase_idle_count(&self, status: IdleStatus, now: Instant);

    /// Accounts bytes read from the transport.
    fn increase_read_bytes(&self, bytes: usize, now: Instant);

    /// Accounts one fully received message.
    fn increase_read_messages(&self, now: Instant);

    /// Accounts bytes queued for write but not yet flushed.
    fn increase_scheduled_write_bytes(&self, bytes: usize);

    /// Offers a received message to a pending read-operation poll.
    fn offer_read_future(&self, message: Message);

    /// Reports session close to a pending read-operation poll.
    fn offer_closed_read_future(&self);

    /// Reports a failure to a pending read-operation poll.
    fn offer_failed_read_future(&self, cause: Cause);
}

/// Key into a session's [`AttributeMap`].
///
/// Keys compare by their name, so a key declared `const` in one crate is
/// stable process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    name: &'static str,
}

impl AttributeKey {
    /// Declares a key. Intended for `const` items.
    pub const fn new(name: &'static str) -> Self {
        AttributeKey { name }
    }

    /// The key's name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Attribute key holding the pending [`ConnectFuture`](crate::future::ConnectFuture).
///
/// Set by the connector before the first event is fired; taken by the chain
/// when `fire_session_created` reaches the tail (success) or when
/// `fire_exception_caught` runs before that (failure).
pub const SESSION_CREATED_FUTURE: AttributeKey = AttributeKey::new("iochain.session-created-future");

/// Typed per-session attribute storage.
///
/// Values are keyed by [`AttributeKey`] and stored as `Any`; `take` removes
/// and returns atomically, which the connect-future glue relies on.
pub struct AttributeMap {
    map: Mutex<HashMap<&'static str, Box<dyn Any + Send>>>,
}

impl AttributeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        AttributeMap {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Stores a value, returning the previous one of the same type if any.
    pub fn set<T: Any + Send>(&self, key: &AttributeKey, value: T) -> Option<T> {
        self.map
            .lock()
            .insert(key.name, Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|boxed| *boxed)
    }

    /// Clones the stored value out, if present and of type `T`.
    pub fn get<T: Any + Send + Clone>(&self, key: &AttributeKey) -> Option<T> {
        self.map
            .lock()
            .get(key.name)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &AttributeKey) -> bool {
        self.map.lock().contains_key(key.name)
    }

    /// Atomically removes and returns the value, if present and of type `T`.
    pub fn take<T: Any + Send>(&self, key: &AttributeKey) -> Option<T> {
        let mut map = self.map.lock();
        match map.remove(key.name) {
            None => None,
            Some(value) => match value.downcast() {
                Ok(boxed) => Some(*boxed),
                Err(other) => {
                    // Wrong type requested: put it back untouched.
                    map.insert(key.name, other);
                    None
                }
            },
        }
    }

    /// Drops every attribute during session teardown.
    pub fn dispose(&self) {
        self.map.lock().clear();
    }
}

impl Default for AttributeMap {
    fn default() -> Self {
        Self::new()
    }
}
