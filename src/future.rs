//! One-shot futures settled by the chain.
//!
//! These are synchronous completion cells, not `std::future::Future`s: the
//! chain is driven by the session's I/O thread and settles them inline, while
//! any thread may inspect or block on the result. All of them are cheap
//! clonable handles onto shared state, and all of them settle exactly once;
//! later settle attempts are ignored.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::Cause;
use crate::session::SessionRef;
use crate::write::Message;

/// Shared settle-once cell backing every future flavor.
struct Cell<T> {
    state: Mutex<Option<T>>,
    cond: Condvar,
}

struct Settable<T>(Arc<Cell<T>>);

impl<T> Clone for Settable<T> {
    fn clone(&self) -> Self {
        Settable(Arc::clone(&self.0))
    }
}

impl<T: Clone> Settable<T> {
    fn new() -> Self {
        Settable(Arc::new(Cell {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }))
    }

    /// First settle wins; returns whether this call was the one that settled.
    fn settle(&self, value: T) -> bool {
        let mut state = self.0.state.lock();
        if state.is_some() {
            return false;
        }
        *state = Some(value);
        self.0.cond.notify_all();
        true
    }

    fn value(&self) -> Option<T> {
        self.0.state.lock().clone()
    }

    fn is_done(&self) -> bool {
        self.0.state.lock().is_some()
    }

    fn wait(&self) -> T {
        let mut state = self.0.state.lock();
        loop {
            if let Some(value) = state.as_ref() {
                return value.clone();
            }
            self.0.cond.wait(&mut state);
        }
    }
}

/// Completion of a connection attempt.
///
/// Stored under [`SESSION_CREATED_FUTURE`](crate::session::SESSION_CREATED_FUTURE)
/// while the connect is pending; the chain completes it with the session on
/// the first successful `session_created`, or exceptionally on any failure
/// observed before that point.
#[derive(Clone)]
pub struct ConnectFuture(Settable<Result<SessionRef, Cause>>);

impl ConnectFuture {
    /// Creates a pending connect future.
    pub fn new() -> Self {
        ConnectFuture(Settable::new())
    }

    /// Completes the future with the connected session.
    pub fn set_session(&self, session: SessionRef) {
        self.0.settle(Ok(session));
    }

    /// Completes the future exceptionally.
    pub fn set_exception(&self, cause: Cause) {
        self.0.settle(Err(cause));
    }

    /// Whether the future has settled either way.
    pub fn is_done(&self) -> bool {
        self.0.is_done()
    }

    /// The connected session, if the attempt succeeded.
    pub fn session(&self) -> Option<SessionRef> {
        self.0.value().and_then(Result::ok)
    }

    /// The failure cause, if the attempt failed.
    pub fn exception(&self) -> Option<Cause> {
        self.0.value().and_then(|r| r.err())
    }

    /// Blocks until the attempt settles.
    pub fn wait(&self) -> Result<SessionRef, Cause> {
        self.0.wait()
    }
}

impl Default for ConnectFuture {
    fn default() -> Self {
        Self::new()
    }
}

/// Acknowledgement of one write request.
///
/// Settled by the chain: written once `fire_message_sent` observes the
/// request, or exceptionally when a filter fails in the write path.
#[derive(Clone)]
pub struct WriteFuture(Settable<Result<(), Cause>>);

impl WriteFuture {
    /// Creates a pending write future.
    pub fn new() -> Self {
        WriteFuture(Settable::new())
    }

    /// Marks the write as flushed to the transport.
    pub fn set_written(&self) {
        self.0.settle(Ok(()));
    }

    /// Marks the write as failed.
    pub fn set_exception(&self, cause: Cause) {
        self.0.settle(Err(cause));
    }

    /// Whether the write settled either way.
    pub fn is_done(&self) -> bool {
        self.0.is_done()
    }

    /// Whether the write was acknowledged successfully.
    pub fn is_written(&self) -> bool {
        matches!(self.0.value(), Some(Ok(())))
    }

    /// The failure cause, if the write failed.
    pub fn exception(&self) -> Option<Cause> {
        self.0.value().and_then(|r| r.err())
    }

    /// Blocks until the write settles.
    pub fn wait(&self) -> Result<(), Cause> {
        self.0.wait()
    }
}

impl Default for WriteFuture {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion of session teardown, settled by `fire_session_closed`.
#[derive(Clone)]
pub struct CloseFuture(Settable<()>);

impl CloseFuture {
    /// Creates a pending close future.
    pub fn new() -> Self {
        CloseFuture(Settable::new())
    }

    /// Marks the session closed.
    pub fn set_closed(&self) {
        self.0.settle(());
    }

    /// Whether the session has closed.
    pub fn is_closed(&self) -> bool {
        self.0.is_done()
    }

    /// Blocks until the session closes.
    pub fn wait(&self) {
        self.0.wait()
    }
}

impl Default for CloseFuture {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome delivered through a read future.
#[derive(Clone)]
pub enum ReadEvent {
    /// A message reached the tail.
    Message(Arc<Message>),
    /// The session closed before another message arrived.
    Closed,
    /// An error reached the tail.
    Failed(Cause),
}

/// One pending read-operation poll.
///
/// Sessions configured for read-operation polling hand these out to callers;
/// the chain's tail offers the settling value through the session's
/// `offer_*_read_future` methods.
#[derive(Clone)]
pub struct ReadFuture(Settable<ReadEvent>);

impl ReadFuture {
    /// Creates a pending read future.
    pub fn new() -> Self {
        ReadFuture(Settable::new())
    }

    /// Settles the future with the given event.
    pub fn set(&self, event: ReadEvent) {
        self.0.settle(event);
    }

    /// Whether a read outcome is available.
    pub fn is_done(&self) -> bool {
        self.0.is_done()
    }

    /// The read outcome, if available.
    pub fn event(&self) -> Option<ReadEvent> {
        self.0.value()
    }

    /// Blocks until a read outcome is available.
    pub fn wait(&self) -> ReadEvent {
        self.0.wait()
    }
}

impl Default for ReadFuture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_future_settles_once() {
        let future = WriteFuture::new();
        assert!(!future.is_done());

        future.set_written();
        assert!(future.is_written());

        // A later exceptional settle is ignored.
        future.set_exception(Arc::from(Box::<dyn std::error::Error + Send + Sync>::from("late")));
        assert!(future.is_written());
        assert!(future.exception().is_none());
    }

    #[test]
    fn clones_share_state() {
        let future = CloseFuture::new();
        let observer = future.clone();
        future.set_closed();
        assert!(observer.is_closed());
    }
}
